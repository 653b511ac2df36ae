//! Certificate as kept in the bucket: domains, private key and the issued chain
use crate::Error;

const PEM_END_CERTIFICATE: &str = "-----END CERTIFICATE-----\n";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    domains: Vec<String>,
    private_key_pem: String,
    certificate_pem: Option<String>,
    chain_pem: String,
}

impl Certificate {
    pub fn new(domains: Vec<String>, private_key_pem: String) -> Result<Self, Error> {
        if domains.is_empty() {
            return Err(Error::NoDomains);
        }
        Ok(Self {
            domains,
            private_key_pem,
            certificate_pem: None,
            chain_pem: String::new(),
        })
    }

    /// First domain names the certificate in storage and in ACM
    pub fn name<'a>(&'a self) -> &'a str {
        self.domains[0].as_str()
    }

    pub fn domains<'a>(&'a self) -> &'a [String] {
        self.domains.as_slice()
    }

    pub fn private_key_pem<'a>(&'a self) -> &'a str {
        self.private_key_pem.as_str()
    }

    pub fn certificate_pem<'a>(&'a self) -> Result<&'a str, Error> {
        self.certificate_pem
            .as_deref()
            .ok_or_else(|| Error::CertificateNotSet(self.name().to_string()))
    }

    /// Intermediate certificates, empty when the CA sent only the leaf
    pub fn chain_pem<'a>(&'a self) -> &'a str {
        self.chain_pem.as_str()
    }

    pub fn fullchain_pem(&self) -> Result<String, Error> {
        Ok(format!("{}{}", self.certificate_pem()?, self.chain_pem))
    }

    /// Split a fullchain PEM after the first certificate
    pub fn set_fullchain(&mut self, fullchain_pem: &str) {
        match fullchain_pem.split_once(PEM_END_CERTIFICATE) {
            Some((leaf, chain)) => {
                self.certificate_pem = Some(format!("{}{}", leaf, PEM_END_CERTIFICATE));
                self.chain_pem = chain.trim_start().to_string();
            }
            None => {
                self.certificate_pem = Some(fullchain_pem.to_string());
                self.chain_pem = String::new();
            }
        }
    }

    /// DER bytes of the leaf certificate, as the CA expects for revocation
    pub fn leaf_der(&self) -> Result<Vec<u8>, Error> {
        let (_rem, pem) = x509_parser::pem::parse_x509_pem(self.certificate_pem()?.as_bytes())?;
        Ok(pem.contents)
    }

    pub fn not_after(&self) -> Result<chrono::DateTime<chrono::Utc>, Error> {
        use x509_parser::prelude::FromDer;

        let der = self.leaf_der()?;
        let (_rem, crt) = x509_parser::certificate::X509Certificate::from_der(&der)?;
        let timestamp = crt.validity().not_after.timestamp();
        chrono::DateTime::<chrono::Utc>::from_timestamp(timestamp, 0)
            .ok_or_else(|| Error::CertificateNotSet(self.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF: &str = "-----BEGIN CERTIFICATE-----\nTEVBRg==\n-----END CERTIFICATE-----\n";
    const ISSUER: &str = "-----BEGIN CERTIFICATE-----\nSVNTVUVS\n-----END CERTIFICATE-----\n";

    fn certificate() -> Certificate {
        Certificate::new(
            vec!["example.com".to_string(), "www.example.com".to_string()],
            "key".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn split_fullchain() {
        let mut crt = certificate();
        assert!(matches!(crt.fullchain_pem(), Err(Error::CertificateNotSet(_))));

        crt.set_fullchain(&format!("{}\n{}", LEAF, ISSUER));
        assert_eq!(crt.certificate_pem().unwrap(), LEAF);
        assert_eq!(crt.chain_pem(), ISSUER);
        assert_eq!(crt.fullchain_pem().unwrap(), format!("{}{}", LEAF, ISSUER));
    }

    #[test]
    fn leaf_only() {
        let mut crt = certificate();
        crt.set_fullchain(LEAF);
        assert_eq!(crt.certificate_pem().unwrap(), LEAF);
        assert_eq!(crt.chain_pem(), "");
    }

    #[test]
    fn name_is_first_domain() {
        let crt = certificate();
        assert_eq!(crt.name(), "example.com");
        assert!(matches!(
            crt.certificate_pem(),
            Err(Error::CertificateNotSet(name)) if name == "example.com"
        ));
    }

    #[test]
    fn empty_domains_rejected() {
        assert!(matches!(
            Certificate::new(vec![], "key".to_string()),
            Err(Error::NoDomains)
        ));
    }
}
