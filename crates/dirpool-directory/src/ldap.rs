//! ldap3-backed directory sessions
//!
//! Every session is opened over LDAPS (or STARTTLS) with the client
//! configuration produced by the trust policy, then bound with the pool's
//! service identity.

use crate::session::{Connector, DirectorySession};
use async_trait::async_trait;
use dirpool_core::config::DirectoryConfig;
use dirpool_core::error::RC_SUCCESS;
use dirpool_core::{AttributeMutation, Error, ModificationKind, Result, RootDse};
use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope, SearchEntry, SearchResult};
use rustls::ClientConfig;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Request no attributes from a search
const NO_ATTRIBUTES: &str = "1.1";

/// Opens bound ldap3 sessions against one server
pub struct LdapConnector {
    url: String,
    settings: LdapConnSettings,
    bind_dn: String,
    bind_secret: String,
    operation_timeout: Duration,
}

impl LdapConnector {
    pub fn new(config: &DirectoryConfig, tls: Arc<ClientConfig>) -> Self {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(config.connect_timeout())
            .set_starttls(config.start_tls)
            .set_config(tls);

        Self {
            url: config.url(),
            settings,
            bind_dn: config.bind_dn.clone(),
            bind_secret: config.bind_secret.clone(),
            operation_timeout: config.operation_timeout(),
        }
    }

}

#[async_trait]
impl Connector for LdapConnector {
    type Session = LdapSession;

    async fn connect(&self) -> Result<LdapSession> {
        debug!("Connecting to directory server: {}", self.url);

        let (conn, mut ldap) = LdapConnAsync::with_settings(self.settings.clone(), &self.url)
            .await
            .map_err(|e| map_ldap_error("connect", &self.url, e))?;

        ldap3::drive!(conn);

        let result = ldap
            .with_timeout(self.operation_timeout)
            .simple_bind(&self.bind_dn, &self.bind_secret)
            .await
            .map_err(|e| map_ldap_error("bind", &self.bind_dn, e))?;

        if result.rc != RC_SUCCESS {
            if let Err(e) = ldap.unbind().await {
                debug!("Unbind after rejected bind failed: {}", e);
            }
            return Err(Error::Authentication {
                bind_dn: self.bind_dn.clone(),
                code: result.rc,
                message: result.text,
            });
        }

        debug!("Bound to {} as {}", self.url, self.bind_dn);

        Ok(LdapSession {
            ldap,
            operation_timeout: self.operation_timeout,
            closed: false,
        })
    }

    fn target(&self) -> String {
        self.url.clone()
    }
}

/// A bound ldap3 handle
pub struct LdapSession {
    ldap: Ldap,
    operation_timeout: Duration,
    closed: bool,
}

impl LdapSession {
    fn ldap(&mut self) -> &mut Ldap {
        let timeout = self.operation_timeout;
        self.ldap.with_timeout(timeout)
    }
}

#[async_trait]
impl DirectorySession for LdapSession {
    async fn find_by_equality(
        &mut self,
        base_dn: &str,
        attribute: &str,
        value: &str,
    ) -> Result<Vec<String>> {
        let filter = equality_filter(attribute, value);
        debug!("Searching {} with filter: {}", base_dn, filter);

        let SearchResult(entries, result) = self
            .ldap()
            .search(base_dn, Scope::Subtree, &filter, vec![NO_ATTRIBUTES])
            .await
            .map_err(|e| map_ldap_error("search", base_dn, e))?;

        if result.rc != RC_SUCCESS {
            return Err(Error::from_result_code("search", base_dn, result.rc, result.text));
        }

        Ok(entries
            .into_iter()
            .map(|entry| SearchEntry::construct(entry).dn)
            .collect())
    }

    async fn modify(&mut self, dn: &str, mutation: &AttributeMutation) -> Result<()> {
        mutation.validate(dn)?;

        let operation = format!("modify ({} {})", mutation.kind, mutation.attribute);
        debug!("{} on {}", operation, dn);

        let result = self
            .ldap()
            .modify(dn, vec![to_ldap_mod(mutation)])
            .await
            .map_err(|e| map_ldap_error(&operation, dn, e))?;

        if result.rc != RC_SUCCESS {
            return Err(Error::from_result_code(operation, dn, result.rc, result.text));
        }

        Ok(())
    }

    async fn read_attribute(&mut self, dn: &str, attribute: &str) -> Result<Option<Vec<String>>> {
        let SearchResult(entries, result) = self
            .ldap()
            .search(dn, Scope::Base, "(objectClass=*)", vec![attribute])
            .await
            .map_err(|e| map_ldap_error("read", dn, e))?;

        if result.rc != RC_SUCCESS {
            return Err(Error::from_result_code("read", dn, result.rc, result.text));
        }

        let entry = match entries.into_iter().next() {
            Some(entry) => SearchEntry::construct(entry),
            None => {
                return Err(Error::NotFound {
                    operation: "read".into(),
                    dn: dn.into(),
                    message: "no entry returned".into(),
                })
            }
        };

        // Servers may echo the attribute name in a different case
        Ok(get_attr(&entry, attribute))
    }

    async fn root_dse(&mut self) -> Result<RootDse> {
        let SearchResult(entries, result) = self
            .ldap()
            .search(
                "",
                Scope::Base,
                "(objectClass=*)",
                vec![
                    "vendorName",
                    "vendorVersion",
                    "namingContexts",
                    "supportedLDAPVersion",
                ],
            )
            .await
            .map_err(|e| map_ldap_error("root DSE query", "", e))?;

        if result.rc != RC_SUCCESS {
            return Err(Error::from_result_code("root DSE query", "", result.rc, result.text));
        }

        let info = match entries.into_iter().next() {
            Some(entry) => {
                let entry = SearchEntry::construct(entry);
                RootDse {
                    vendor: get_first_attr(&entry, "vendorName"),
                    version: get_first_attr(&entry, "vendorVersion"),
                    naming_contexts: get_attr(&entry, "namingContexts").unwrap_or_default(),
                    supported_ldap_version: get_attr(&entry, "supportedLDAPVersion")
                        .unwrap_or_default(),
                }
            }
            None => RootDse {
                supported_ldap_version: vec!["3".to_string()],
                ..Default::default()
            },
        };

        Ok(info)
    }

    fn is_closed(&mut self) -> bool {
        self.closed || self.ldap.is_closed()
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.ldap
            .unbind()
            .await
            .map_err(|e| map_ldap_error("unbind", "", e))
    }
}

/// `(attribute=value)` with the value escaped for filter syntax
pub fn equality_filter(attribute: &str, value: &str) -> String {
    format!("({}={})", attribute, ldap_escape(value))
}

fn to_ldap_mod(mutation: &AttributeMutation) -> Mod<&str> {
    let attribute = mutation.attribute.as_str();
    let values: HashSet<&str> = mutation.value.as_deref().into_iter().collect();

    match mutation.kind {
        ModificationKind::Add => Mod::Add(attribute, values),
        ModificationKind::Replace => Mod::Replace(attribute, values),
        // An empty value set removes the whole attribute
        ModificationKind::Delete => Mod::Delete(attribute, values),
    }
}

/// Values of `attr`, matching the name case-insensitively
fn get_attr(entry: &SearchEntry, attr: &str) -> Option<Vec<String>> {
    entry
        .attrs
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(attr))
        .map(|(_, values)| values.clone())
}

/// Helper to get first attribute value from LDAP entry
fn get_first_attr(entry: &SearchEntry, attr: &str) -> Option<String> {
    get_attr(entry, attr).and_then(|v| v.into_iter().next())
}

/// Translate an ldap3 error into the pool's taxonomy.
fn map_ldap_error(operation: &str, dn: &str, err: LdapError) -> Error {
    match err {
        LdapError::LdapResult { result } => {
            Error::from_result_code(operation, dn, result.rc, result.text)
        }
        LdapError::Timeout { .. } => Error::Timeout {
            operation: operation.to_string(),
        },
        LdapError::Rustls { source } => Error::Tls(source.to_string()),
        LdapError::DNSName { source } => Error::Tls(format!("Invalid server name: {}", source)),
        LdapError::Io { source } => map_io_error(operation, source),
        other => Error::connection(operation, other.to_string()),
    }
}

/// Handshake failures reach us as I/O errors wrapping the rustls error
fn map_io_error(operation: &str, source: std::io::Error) -> Error {
    let tls = source
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>());

    match tls {
        Some(tls) => Error::Tls(tls.to_string()),
        None => Error::connection(operation, source.to_string()),
    }
}
