use tracing::{debug, info};

use crate::storage::CertificateStore;
use crate::Error;

/// Load the ACME account kept in the store, or register a new one and keep it.
pub async fn load_or_register_account(
    store: &CertificateStore,
    directory_url: &str,
    account_email: &str,
) -> Result<instant_acme::Account, Error> {
    if let Some(credentials) = store.get_account().await? {
        debug!("using stored ACME account");
        let account = instant_acme::Account::from_credentials(credentials).await?;
        return Ok(account);
    }

    // Request ACME server to create new account
    let contacts_mailto = contact_urls(account_email);
    let contacts_str = contacts_mailto
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<&str>>();

    let (account, credentials) = instant_acme::Account::create(
        &instant_acme::NewAccount {
            contact: &contacts_str,
            terms_of_service_agreed: true,
            only_return_existing: false,
        },
        directory_url,
        None,
    )
    .await?;
    info!(directory_url, "ACME account created");

    store.set_account(&credentials).await?;

    Ok(account)
}

/// An empty email registers the account without contact
fn contact_urls(account_email: &str) -> Vec<String> {
    account_email
        .split(',')
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .map(|email| format!("mailto:{}", email))
        .collect()
}
