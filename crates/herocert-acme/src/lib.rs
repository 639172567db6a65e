// # instant-acme Service
//
// `AcmeService` implementation on top of `instant-acme`.
//
// The engine speaks in URLs (`Order::url`, `Challenge::url`); this crate keeps
// the live `instant_acme::Order` handles keyed by order URL and looks them up
// on every call. An order handle is dropped once its certificate has been
// downloaded.
//
// The certificate key pair and CSR are generated here with `rcgen` when the
// order is finalized. The leaf expiry is read back with `x509-parser`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herocert_core::config::ChallengeType;
use herocert_core::traits::{
    AcmeService, Certificate, Challenge, ChallengeStatus, Order, OrderStatus,
};
use herocert_core::{Error, Result};
use instant_acme::{Account, AuthorizationStatus, Identifier, NewAccount, NewOrder};
use std::collections::HashMap;
use tokio::sync::Mutex;

struct OrderEntry {
    handle: instant_acme::Order,
    domains: Vec<String>,
    /// PEM key matching the submitted CSR
    private_key_pem: Option<String>,
}

#[derive(Default)]
struct Orders {
    by_url: HashMap<String, OrderEntry>,
    /// challenge URL -> order URL
    challenge_owner: HashMap<String, String>,
}

impl Orders {
    fn entry(&mut self, order_url: &str) -> Result<&mut OrderEntry> {
        self.by_url
            .get_mut(order_url)
            .ok_or_else(|| Error::acme(format!("Unknown order: {}", order_url)))
    }

    fn owner_of(&mut self, challenge_url: &str) -> Result<&mut OrderEntry> {
        let order_url = self
            .challenge_owner
            .get(challenge_url)
            .cloned()
            .ok_or_else(|| Error::acme(format!("Unknown challenge: {}", challenge_url)))?;
        self.entry(&order_url)
    }

    fn forget(&mut self, order_url: &str) {
        self.by_url.remove(order_url);
        self.challenge_owner.retain(|_, owner| owner != order_url);
    }
}

/// ACME client bound to one account
pub struct InstantAcmeService {
    account: Account,
    directory_url: String,
    orders: Mutex<Orders>,
}

impl std::fmt::Debug for InstantAcmeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantAcmeService")
            .field("directory_url", &self.directory_url)
            .finish_non_exhaustive()
    }
}

impl InstantAcmeService {
    /// Register (or look up) the account for `email` at `directory_url`
    ///
    /// ACME servers return the existing account when the key is already
    /// known; a fresh key is generated on every start, so this always
    /// creates a new account.
    pub async fn connect(directory_url: &str, email: &str, terms_agreed: bool) -> Result<Self> {
        tracing::info!("Registering ACME account for {} at {}", email, directory_url);

        let contact = format!("mailto:{}", email);
        let (account, _credentials) = Account::builder()
            .map_err(|e| Error::acme(format!("Failed to build ACME client: {}", e)))?
            .create(
                &NewAccount {
                    contact: &[&contact],
                    terms_of_service_agreed: terms_agreed,
                    only_return_existing: false,
                },
                directory_url.to_owned(),
                None,
            )
            .await
            .map_err(|e| Error::acme(format!("Account registration failed: {}", e)))?;

        Ok(Self {
            account,
            directory_url: directory_url.to_string(),
            orders: Mutex::new(Orders::default()),
        })
    }
}

#[async_trait]
impl AcmeService for InstantAcmeService {
    async fn create_order(&self, domains: &[String]) -> Result<Order> {
        let identifiers: Vec<Identifier> = domains
            .iter()
            .map(|d| Identifier::Dns(d.clone()))
            .collect();

        let handle = self
            .account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(|e| Error::acme(format!("Order creation failed: {}", e)))?;

        let url = handle.url().to_string();
        tracing::debug!("Created order {} for {}", url, domains.join(", "));

        self.orders.lock().await.by_url.insert(
            url.clone(),
            OrderEntry {
                handle,
                domains: domains.to_vec(),
                private_key_pem: None,
            },
        );

        Ok(Order {
            url,
            domains: domains.to_vec(),
        })
    }

    async fn challenges(
        &self,
        order: &Order,
        challenge_type: ChallengeType,
    ) -> Result<Vec<Challenge>> {
        let mut orders = self.orders.lock().await;
        let entry = orders.entry(&order.url)?;

        let mut challenges = Vec::new();
        let mut authorizations = entry.handle.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result
                .map_err(|e| Error::acme(format!("Failed to fetch authorization: {}", e)))?;

            let identifier = authz.identifier();
            let domain = match identifier.identifier {
                Identifier::Dns(name) if identifier.wildcard => format!("*.{}", name),
                Identifier::Dns(name) => name.clone(),
                _ => continue,
            };

            if authz.status == AuthorizationStatus::Valid {
                tracing::debug!("Authorization for {} already valid", domain);
                continue;
            }

            let Some(handle) = authz.challenge(acme_challenge_type(challenge_type)) else {
                return Err(Error::acme(format!(
                    "No {} challenge offered for {}",
                    challenge_type, domain
                )));
            };

            let key_authorization = handle.key_authorization();
            let challenge = match challenge_type {
                ChallengeType::File => Challenge::file(
                    &domain,
                    &handle.url,
                    &handle.token,
                    key_authorization.as_str(),
                ),
                ChallengeType::Dns => {
                    Challenge::dns(&domain, &handle.url, key_authorization.dns_value())
                }
            };
            challenges.push(challenge);
        }

        for challenge in &challenges {
            orders
                .challenge_owner
                .insert(challenge.url.clone(), order.url.clone());
        }

        Ok(challenges)
    }

    async fn request_verification(&self, challenge: &Challenge) -> Result<()> {
        let mut orders = self.orders.lock().await;
        let entry = orders.owner_of(&challenge.url)?;

        let mut authorizations = entry.handle.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result
                .map_err(|e| Error::acme(format!("Failed to fetch authorization: {}", e)))?;

            let Some(kind) = authz
                .challenges
                .iter()
                .find(|c| c.url == challenge.url)
                .map(|c| c.r#type.clone())
            else {
                continue;
            };

            let Some(mut handle) = authz.challenge(kind) else {
                continue;
            };

            return handle.set_ready().await.map_err(|e| {
                Error::verification(&challenge.domain, format!("set_ready failed: {}", e))
            });
        }

        Err(Error::acme(format!(
            "Challenge {} not found in its order",
            challenge.url
        )))
    }

    async fn challenge_status(&self, challenge: &Challenge) -> Result<ChallengeStatus> {
        let mut orders = self.orders.lock().await;
        let entry = orders.owner_of(&challenge.url)?;

        let mut authorizations = entry.handle.authorizations();
        while let Some(result) = authorizations.next().await {
            let authz = result
                .map_err(|e| Error::acme(format!("Failed to fetch authorization: {}", e)))?;

            if let Some(found) = authz.challenges.iter().find(|c| c.url == challenge.url) {
                if let Some(problem) = &found.error {
                    tracing::warn!("Challenge for {} reported: {:?}", challenge.domain, problem);
                }
                return Ok(map_challenge_status(authz.status, found.status));
            }
        }

        Err(Error::acme(format!(
            "Challenge {} not found in its order",
            challenge.url
        )))
    }

    async fn order_status(&self, order: &Order) -> Result<OrderStatus> {
        let mut orders = self.orders.lock().await;
        let entry = orders.entry(&order.url)?;

        let state = entry
            .handle
            .refresh()
            .await
            .map_err(|e| Error::acme(format!("Failed to refresh order: {}", e)))?;

        Ok(map_order_status(state.status))
    }

    async fn finalize_order(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.lock().await;
        let entry = orders.entry(&order.url)?;

        let key = rcgen::KeyPair::generate()
            .map_err(|e| Error::finalization(format!("Failed to generate key: {}", e)))?;
        let params = rcgen::CertificateParams::new(entry.domains.clone())
            .map_err(|e| Error::finalization(format!("Failed to build CSR: {}", e)))?;
        let csr = params
            .serialize_request(&key)
            .map_err(|e| Error::finalization(format!("Failed to serialize CSR: {}", e)))?
            .der()
            .to_vec();

        entry
            .handle
            .finalize_csr(&csr)
            .await
            .map_err(|e| Error::finalization(format!("Finalization rejected: {}", e)))?;

        entry.private_key_pem = Some(key.serialize_pem());
        tracing::debug!("Submitted CSR for {}", order.url);
        Ok(())
    }

    async fn certificate(&self, order: &Order) -> Result<Certificate> {
        let mut orders = self.orders.lock().await;
        let entry = orders.entry(&order.url)?;

        let private_key_pem = entry
            .private_key_pem
            .clone()
            .ok_or_else(|| Error::finalization("Order was not finalized by this client"))?;

        let chain_pem = entry
            .handle
            .certificate()
            .await
            .map_err(|e| Error::acme(format!("Certificate download failed: {}", e)))?
            .ok_or_else(|| Error::finalization("Order has no certificate yet"))?;

        let not_after = match parse_not_after(&chain_pem) {
            Ok(expiry) => Some(expiry),
            Err(e) => {
                tracing::warn!("Could not read certificate expiry: {}", e);
                None
            }
        };

        let certificate = Certificate {
            domains: entry.domains.clone(),
            chain_pem,
            private_key_pem,
            not_after,
        };

        orders.forget(&order.url);
        Ok(certificate)
    }
}

fn acme_challenge_type(challenge_type: ChallengeType) -> instant_acme::ChallengeType {
    match challenge_type {
        ChallengeType::File => instant_acme::ChallengeType::Http01,
        ChallengeType::Dns => instant_acme::ChallengeType::Dns01,
    }
}

/// A dead authorization outranks whatever its challenge still says
fn map_challenge_status(
    authorization: AuthorizationStatus,
    challenge: instant_acme::ChallengeStatus,
) -> ChallengeStatus {
    match authorization {
        AuthorizationStatus::Expired
        | AuthorizationStatus::Revoked
        | AuthorizationStatus::Deactivated => return ChallengeStatus::Expired,
        AuthorizationStatus::Invalid => return ChallengeStatus::Invalid,
        _ => {}
    }

    match challenge {
        instant_acme::ChallengeStatus::Valid => ChallengeStatus::Valid,
        instant_acme::ChallengeStatus::Invalid => ChallengeStatus::Invalid,
        instant_acme::ChallengeStatus::Pending | instant_acme::ChallengeStatus::Processing => {
            ChallengeStatus::Pending
        }
    }
}

fn map_order_status(status: instant_acme::OrderStatus) -> OrderStatus {
    match status {
        instant_acme::OrderStatus::Pending => OrderStatus::Pending,
        instant_acme::OrderStatus::Ready => OrderStatus::Ready,
        instant_acme::OrderStatus::Processing => OrderStatus::Processing,
        instant_acme::OrderStatus::Valid => OrderStatus::Valid,
        instant_acme::OrderStatus::Invalid => OrderStatus::Invalid,
    }
}

/// Expiry of the first (leaf) certificate in a PEM chain
pub fn parse_not_after(chain_pem: &str) -> Result<DateTime<Utc>> {
    use x509_parser::prelude::*;

    let (_, pem) = x509_parser::pem::parse_x509_pem(chain_pem.as_bytes())
        .map_err(|e| Error::acme(format!("Failed to parse PEM: {}", e)))?;
    let (_, cert) = X509Certificate::from_der(&pem.contents)
        .map_err(|e| Error::acme(format!("Failed to parse certificate: {}", e)))?;

    DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .ok_or_else(|| Error::acme("Certificate expiry out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_not_after_reads_leaf_expiry() {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["example.com".to_string()]).unwrap();
        params.not_after = rcgen::date_time_ymd(2027, 1, 15);
        let cert = params.self_signed(&key).unwrap();

        let expiry = parse_not_after(&cert.pem()).unwrap();
        assert_eq!(expiry, Utc.with_ymd_and_hms(2027, 1, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_not_after_rejects_garbage() {
        assert!(matches!(
            parse_not_after("not a certificate"),
            Err(Error::Acme(_))
        ));
    }

    #[test]
    fn test_processing_challenge_is_still_pending() {
        assert_eq!(
            map_challenge_status(
                AuthorizationStatus::Pending,
                instant_acme::ChallengeStatus::Processing
            ),
            ChallengeStatus::Pending
        );
        assert_eq!(
            map_challenge_status(
                AuthorizationStatus::Valid,
                instant_acme::ChallengeStatus::Valid
            ),
            ChallengeStatus::Valid
        );
    }

    #[test]
    fn test_dead_authorization_overrides_challenge() {
        assert_eq!(
            map_challenge_status(
                AuthorizationStatus::Expired,
                instant_acme::ChallengeStatus::Pending
            ),
            ChallengeStatus::Expired
        );
        assert_eq!(
            map_challenge_status(
                AuthorizationStatus::Invalid,
                instant_acme::ChallengeStatus::Pending
            ),
            ChallengeStatus::Invalid
        );
    }

    #[test]
    fn test_order_status_mapping() {
        assert_eq!(
            map_order_status(instant_acme::OrderStatus::Ready),
            OrderStatus::Ready
        );
        assert_eq!(
            map_order_status(instant_acme::OrderStatus::Invalid),
            OrderStatus::Invalid
        );
    }

    #[test]
    fn test_challenge_type_mapping() {
        assert_eq!(
            acme_challenge_type(ChallengeType::File),
            instant_acme::ChallengeType::Http01
        );
        assert_eq!(
            acme_challenge_type(ChallengeType::Dns),
            instant_acme::ChallengeType::Dns01
        );
    }
}
