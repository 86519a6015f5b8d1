//! In-memory directory used by the pool tests

use crate::session::{Connector, DirectorySession};
use async_trait::async_trait;
use dirpool_core::error::{RC_INSUFFICIENT_ACCESS_RIGHTS, RC_INVALID_CREDENTIALS, RC_NO_SUCH_OBJECT};
use dirpool_core::{AttributeMutation, Error, ModificationKind, Result, RootDse};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub const ADMIN_DN: &str = "cn=admin,dc=example,dc=com";
pub const ADMIN_SECRET: &str = "secret";
pub const JDOE_DN: &str = "uid=jdoe,ou=people,dc=example,dc=com";

const RC_NO_SUCH_ATTRIBUTE: u32 = 16;
const RC_UNDEFINED_ATTRIBUTE_TYPE: u32 = 17;
const RC_ATTRIBUTE_OR_VALUE_EXISTS: u32 = 20;

const SCHEMA: &[&str] = &["objectclass", "uid", "cn", "sn", "mail", "description", "ou", "dc"];
const READ_ONLY: &[&str] = &["uid"];

struct Entry {
    dn: String,
    attrs: Vec<(String, Vec<String>)>,
}

impl Entry {
    fn values_mut(&mut self, attribute: &str) -> Option<&mut Vec<String>> {
        self.attrs
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values)
    }

    fn values(&self, attribute: &str) -> Option<&Vec<String>> {
        self.attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values)
    }
}

#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    accounts: HashMap<String, String>,
    reachable: bool,
    fail_next: bool,
    generation: u64,
    connects: usize,
    unbinds: usize,
    modifications: usize,
}

impl State {
    fn entry_mut(&mut self, dn: &str) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.dn.eq_ignore_ascii_case(dn))
    }

    fn take_failure(&mut self, operation: &str) -> Result<()> {
        if std::mem::take(&mut self.fail_next) {
            return Err(Error::connection(operation, "connection reset by peer"));
        }
        Ok(())
    }
}

fn in_subtree(dn: &str, base: &str) -> bool {
    let dn = dn.to_ascii_lowercase();
    let base = base.to_ascii_lowercase();
    dn == base || dn.ends_with(&format!(",{}", base))
}

pub struct MemoryDirectory {
    state: Mutex<State>,
}

impl MemoryDirectory {
    /// `dc=example,dc=com` with one person entry and one service account
    pub fn example() -> Arc<Self> {
        let directory = Arc::new(Self {
            state: Mutex::new(State {
                reachable: true,
                ..Default::default()
            }),
        });

        directory
            .state
            .lock()
            .accounts
            .insert(ADMIN_DN.to_string(), ADMIN_SECRET.to_string());

        directory.add_entry("dc=example,dc=com", &[("dc", "example")]);
        directory.add_entry("ou=people,dc=example,dc=com", &[("ou", "people")]);
        directory.add_entry(
            JDOE_DN,
            &[
                ("uid", "jdoe"),
                ("cn", "John Doe"),
                ("sn", "Doe"),
                ("mail", "jdoe@example.com"),
            ],
        );
        directory
    }

    pub fn add_entry(&self, dn: &str, attrs: &[(&str, &str)]) {
        let attrs = attrs
            .iter()
            .map(|(name, value)| (name.to_string(), vec![value.to_string()]))
            .collect();
        self.state.lock().entries.push(Entry {
            dn: dn.to_string(),
            attrs,
        });
    }

    pub fn connector(self: &Arc<Self>) -> MemoryConnector {
        self.connector_as(ADMIN_DN, ADMIN_SECRET)
    }

    pub fn connector_as(self: &Arc<Self>, bind_dn: &str, secret: &str) -> MemoryConnector {
        MemoryConnector {
            directory: self.clone(),
            bind_dn: bind_dn.to_string(),
            secret: secret.to_string(),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// The next request on any session fails at the transport level
    pub fn fail_next_operation(&self) {
        self.state.lock().fail_next = true;
    }

    /// Every session opened so far reports itself closed
    pub fn sever_connections(&self) {
        self.state.lock().generation += 1;
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn unbinds(&self) -> usize {
        self.state.lock().unbinds
    }

    pub fn modifications(&self) -> usize {
        self.state.lock().modifications
    }
}

pub struct MemoryConnector {
    directory: Arc<MemoryDirectory>,
    bind_dn: String,
    secret: String,
}

#[async_trait]
impl Connector for MemoryConnector {
    type Session = MemorySession;

    async fn connect(&self) -> Result<MemorySession> {
        let mut state = self.directory.state.lock();
        if !state.reachable {
            return Err(Error::connection("connect", "connection refused"));
        }

        match state.accounts.get(&self.bind_dn) {
            Some(secret) if *secret == self.secret => {}
            _ => {
                return Err(Error::Authentication {
                    bind_dn: self.bind_dn.clone(),
                    code: RC_INVALID_CREDENTIALS,
                    message: "invalid credentials".into(),
                })
            }
        }

        state.connects += 1;
        Ok(MemorySession {
            directory: self.directory.clone(),
            generation: state.generation,
            closed: false,
        })
    }

    fn target(&self) -> String {
        "memory://example".to_string()
    }
}

pub struct MemorySession {
    directory: Arc<MemoryDirectory>,
    generation: u64,
    closed: bool,
}

#[async_trait]
impl DirectorySession for MemorySession {
    async fn find_by_equality(
        &mut self,
        base_dn: &str,
        attribute: &str,
        value: &str,
    ) -> Result<Vec<String>> {
        let mut state = self.directory.state.lock();
        state.take_failure("search")?;

        if !state.entries.iter().any(|e| e.dn.eq_ignore_ascii_case(base_dn)) {
            return Err(Error::from_result_code("search", base_dn, RC_NO_SUCH_OBJECT, "no such object"));
        }

        Ok(state
            .entries
            .iter()
            .filter(|e| in_subtree(&e.dn, base_dn))
            .filter(|e| {
                e.values(attribute)
                    .map_or(false, |values| values.iter().any(|v| v.eq_ignore_ascii_case(value)))
            })
            .map(|e| e.dn.clone())
            .collect())
    }

    async fn modify(&mut self, dn: &str, mutation: &AttributeMutation) -> Result<()> {
        let mut state = self.directory.state.lock();
        state.take_failure("modify")?;
        state.modifications += 1;

        let attribute = mutation.attribute.as_str();
        let fail = |code: u32, message: &str| Error::from_result_code("modify", dn, code, message);

        if !SCHEMA.iter().any(|a| a.eq_ignore_ascii_case(attribute)) {
            return Err(fail(RC_UNDEFINED_ATTRIBUTE_TYPE, "undefined attribute type"));
        }
        if READ_ONLY.iter().any(|a| a.eq_ignore_ascii_case(attribute)) {
            return Err(fail(RC_INSUFFICIENT_ACCESS_RIGHTS, "insufficient access rights"));
        }

        let entry = state
            .entry_mut(dn)
            .ok_or_else(|| fail(RC_NO_SUCH_OBJECT, "no such object"))?;
        let value = mutation.value.clone().unwrap_or_default();

        match mutation.kind {
            ModificationKind::Add => match entry.values_mut(attribute) {
                Some(values) if values.contains(&value) => {
                    return Err(fail(RC_ATTRIBUTE_OR_VALUE_EXISTS, "value exists"))
                }
                Some(values) => values.push(value),
                None => entry.attrs.push((attribute.to_string(), vec![value])),
            },
            ModificationKind::Replace => match entry.values_mut(attribute) {
                Some(values) => *values = vec![value],
                None => entry.attrs.push((attribute.to_string(), vec![value])),
            },
            ModificationKind::Delete => {
                let Some(values) = entry.values_mut(attribute) else {
                    return Err(fail(RC_NO_SUCH_ATTRIBUTE, "no such attribute"));
                };
                if let Some(value) = &mutation.value {
                    let before = values.len();
                    values.retain(|v| v != value);
                    if values.len() == before {
                        return Err(fail(RC_NO_SUCH_ATTRIBUTE, "no such value"));
                    }
                } else {
                    values.clear();
                }
                // An attribute with no values left is gone
                entry.attrs.retain(|(_, values)| !values.is_empty());
            }
        }

        Ok(())
    }

    async fn read_attribute(&mut self, dn: &str, attribute: &str) -> Result<Option<Vec<String>>> {
        let mut state = self.directory.state.lock();
        state.take_failure("read")?;

        let entry = state
            .entry_mut(dn)
            .ok_or_else(|| Error::from_result_code("read", dn, RC_NO_SUCH_OBJECT, "no such object"))?;
        Ok(entry.values(attribute).cloned())
    }

    async fn root_dse(&mut self) -> Result<RootDse> {
        self.directory.state.lock().take_failure("root DSE query")?;

        Ok(RootDse {
            vendor: Some("Memory".into()),
            version: None,
            naming_contexts: vec!["dc=example,dc=com".into()],
            supported_ldap_version: vec!["3".into()],
        })
    }

    fn is_closed(&mut self) -> bool {
        self.closed || self.generation != self.directory.state.lock().generation
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.directory.state.lock().unbinds += 1;
        }
        Ok(())
    }
}
