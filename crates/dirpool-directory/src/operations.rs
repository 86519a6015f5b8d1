//! Directory operations over a borrowed connection

use crate::pool::{DirectoryConnection, DirectoryPool};
use crate::session::{Connector, DirectorySession};
use dirpool_core::{AttributeMutation, BatchError, Error, Result, RootDse};
use tracing::{debug, info, warn};

impl<C: Connector> DirectoryPool<C> {
    // ========================================================================
    // Lookup
    // ========================================================================

    /// Resolve a username to the DN of its entry under `base_dn`.
    ///
    /// When several entries match, the first one returned by the server wins.
    pub async fn lookup_user_dn(
        &self,
        conn: &mut DirectoryConnection<C>,
        username: &str,
        base_dn: &str,
    ) -> Result<String> {
        let attribute = self.lookup_attribute.as_str();
        debug!("Looking up {}={} under {}", attribute, username, base_dn);

        let result = conn
            .session()?
            .find_by_equality(base_dn, attribute, username)
            .await;
        let mut dns = conn.observe(result)?.into_iter();

        let dn = dns.next().ok_or_else(|| Error::NotFound {
            operation: "lookup user".into(),
            dn: base_dn.into(),
            message: format!("no entry with {}={}", attribute, username),
        })?;

        let extra = dns.count();
        if extra > 0 {
            warn!(
                "{} entries match {}={} under {}, using {}",
                extra + 1,
                attribute,
                username,
                base_dn,
                dn
            );
        }

        Ok(dn)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Submit one modify request carrying `mutation`.
    pub async fn apply_mutation(
        &self,
        conn: &mut DirectoryConnection<C>,
        target_dn: &str,
        mutation: &AttributeMutation,
    ) -> Result<()> {
        mutation.validate(target_dn)?;

        let result = conn.session()?.modify(target_dn, mutation).await;
        conn.observe(result)?;

        info!(
            "Applied {} of '{}' to {}",
            mutation.kind, mutation.attribute, target_dn
        );
        Ok(())
    }

    pub async fn add_attribute(
        &self,
        conn: &mut DirectoryConnection<C>,
        target_dn: &str,
        attribute: &str,
        value: &str,
    ) -> Result<()> {
        self.apply_mutation(conn, target_dn, &AttributeMutation::add(attribute, value))
            .await
    }

    pub async fn replace_attribute(
        &self,
        conn: &mut DirectoryConnection<C>,
        target_dn: &str,
        attribute: &str,
        value: &str,
    ) -> Result<()> {
        self.apply_mutation(conn, target_dn, &AttributeMutation::replace(attribute, value))
            .await
    }

    pub async fn delete_attribute(
        &self,
        conn: &mut DirectoryConnection<C>,
        target_dn: &str,
        attribute: &str,
    ) -> Result<()> {
        self.apply_mutation(conn, target_dn, &AttributeMutation::delete(attribute))
            .await
    }

    /// Replace each attribute in order, one request per pair.
    ///
    /// The batch is not atomic. On failure, attributes replaced before the
    /// failing one stay committed and are listed in the returned `BatchError`.
    /// Returns the names of all replaced attributes.
    pub async fn apply_batch<I, K, V>(
        &self,
        conn: &mut DirectoryConnection<C>,
        target_dn: &str,
        attributes: I,
    ) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mutations: Vec<AttributeMutation> = attributes
            .into_iter()
            .map(|(attribute, value)| AttributeMutation::replace(attribute, value))
            .collect();

        let mut committed = Vec::with_capacity(mutations.len());
        for (index, mutation) in mutations.iter().enumerate() {
            if let Err(source) = self.apply_mutation(conn, target_dn, mutation).await {
                let not_attempted: Vec<String> = mutations[index + 1..]
                    .iter()
                    .map(|m| m.attribute.clone())
                    .collect();

                warn!(
                    "Batch update of {} stopped at '{}' after {} replacement(s)",
                    target_dn,
                    mutation.attribute,
                    committed.len()
                );

                return Err(BatchError {
                    dn: target_dn.to_string(),
                    committed,
                    failed_attribute: mutation.attribute.clone(),
                    not_attempted,
                    source: Box::new(source),
                }
                .into());
            }
            committed.push(mutation.attribute.clone());
        }

        Ok(committed)
    }

    /// [`apply_batch`](Self::apply_batch) for callers that only need success or failure.
    pub async fn update_attributes<I, K, V>(
        &self,
        conn: &mut DirectoryConnection<C>,
        target_dn: &str,
        attributes: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.apply_batch(conn, target_dn, attributes).await.map(|_| ())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Values of `attribute` on `dn`, or `None` when the entry lacks it.
    pub async fn read_attribute(
        &self,
        conn: &mut DirectoryConnection<C>,
        dn: &str,
        attribute: &str,
    ) -> Result<Option<Vec<String>>> {
        let result = conn.session()?.read_attribute(dn, attribute).await;
        conn.observe(result)
    }

    pub async fn root_dse(&self, conn: &mut DirectoryConnection<C>) -> Result<RootDse> {
        let result = conn.session()?.root_dse().await;
        conn.observe(result)
    }
}

#[cfg(test)]
mod tests {
    use crate::memory::{MemoryConnector, MemoryDirectory, JDOE_DN};
    use crate::pool::DirectoryPool;
    use dirpool_core::config::PoolConfig;
    use dirpool_core::{AttributeMutation, Error, ModificationKind};
    use std::sync::Arc;

    async fn open(directory: &Arc<MemoryDirectory>) -> DirectoryPool<MemoryConnector> {
        let config = PoolConfig {
            capacity: 2,
            prefill: false,
            borrow_timeout_secs: 1,
        };
        DirectoryPool::with_connector(directory.connector(), &config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_lookup_known_user() {
        let directory = MemoryDirectory::example();
        let pool = open(&directory).await;
        let mut conn = pool.borrow().await.unwrap();

        let dn = pool
            .lookup_user_dn(&mut conn, "jdoe", "dc=example,dc=com")
            .await
            .unwrap();
        assert_eq!(dn, JDOE_DN);
    }

    #[tokio::test]
    async fn test_lookup_unknown_user_is_not_found() {
        let directory = MemoryDirectory::example();
        let pool = open(&directory).await;
        let mut conn = pool.borrow().await.unwrap();

        let err = pool
            .lookup_user_dn(&mut conn, "nobody", "dc=example,dc=com")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!conn.is_broken());
    }

    #[tokio::test]
    async fn test_lookup_takes_first_of_several_matches() {
        let directory = MemoryDirectory::example();
        directory.add_entry("uid=jdoe,ou=contractors,dc=example,dc=com", &[("uid", "jdoe")]);
        let pool = open(&directory).await;
        let mut conn = pool.borrow().await.unwrap();

        let dn = pool
            .lookup_user_dn(&mut conn, "jdoe", "dc=example,dc=com")
            .await
            .unwrap();
        assert_eq!(dn, JDOE_DN);
    }

    #[tokio::test]
    async fn test_lookup_uses_configured_attribute() {
        let directory = MemoryDirectory::example();
        let pool = open(&directory).await.with_lookup_attribute("mail");
        let mut conn = pool.borrow().await.unwrap();

        let dn = pool
            .lookup_user_dn(&mut conn, "jdoe@example.com", "dc=example,dc=com")
            .await
            .unwrap();
        assert_eq!(dn, JDOE_DN);
    }

    #[tokio::test]
    async fn test_lookup_treats_wildcard_as_literal() {
        let directory = MemoryDirectory::example();
        let pool = open(&directory).await;
        let mut conn = pool.borrow().await.unwrap();

        let err = pool
            .lookup_user_dn(&mut conn, "*", "dc=example,dc=com")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_add_read_replace_read_delete() {
        let directory = MemoryDirectory::example();
        let pool = open(&directory).await;
        let mut conn = pool.borrow().await.unwrap();

        let dn = pool
            .lookup_user_dn(&mut conn, "jdoe", "dc=example,dc=com")
            .await
            .unwrap();

        pool.add_attribute(&mut conn, &dn, "description", "X").await.unwrap();
        assert_eq!(
            pool.read_attribute(&mut conn, &dn, "description").await.unwrap(),
            Some(vec!["X".to_string()])
        );

        pool.replace_attribute(&mut conn, &dn, "description", "Y").await.unwrap();
        assert_eq!(
            pool.read_attribute(&mut conn, &dn, "description").await.unwrap(),
            Some(vec!["Y".to_string()])
        );

        pool.delete_attribute(&mut conn, &dn, "description").await.unwrap();
        assert_eq!(pool.read_attribute(&mut conn, &dn, "description").await.unwrap(), None);

        pool.release(conn).await;
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_of_absent_attribute_is_protocol_error() {
        let directory = MemoryDirectory::example();
        let pool = open(&directory).await;
        let mut conn = pool.borrow().await.unwrap();

        let err = pool
            .delete_attribute(&mut conn, JDOE_DN, "description")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ProtocolError");
        assert_eq!(err.result_code(), Some(16));
    }

    #[tokio::test]
    async fn test_denied_write_is_permission_error() {
        let directory = MemoryDirectory::example();
        let pool = open(&directory).await;
        let mut conn = pool.borrow().await.unwrap();

        let err = pool
            .replace_attribute(&mut conn, JDOE_DN, "uid", "jsmith")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PermissionError");
        assert_eq!(
            pool.read_attribute(&mut conn, JDOE_DN, "uid").await.unwrap(),
            Some(vec!["jdoe".to_string()])
        );
    }

    #[tokio::test]
    async fn test_malformed_mutation_is_rejected_before_sending() {
        let directory = MemoryDirectory::example();
        let pool = open(&directory).await;
        let mut conn = pool.borrow().await.unwrap();

        let mutation = AttributeMutation {
            kind: ModificationKind::Add,
            attribute: "description".into(),
            value: None,
        };
        let err = pool
            .apply_mutation(&mut conn, JDOE_DN, &mutation)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ProtocolError");
        assert_eq!(directory.modifications(), 0);
        assert!(!conn.is_broken());
    }

    #[tokio::test]
    async fn test_delete_of_one_value_is_forwarded() {
        let directory = MemoryDirectory::example();
        let pool = open(&directory).await;
        let mut conn = pool.borrow().await.unwrap();

        pool.add_attribute(&mut conn, JDOE_DN, "description", "X").await.unwrap();
        pool.add_attribute(&mut conn, JDOE_DN, "description", "Y").await.unwrap();

        pool.apply_mutation(&mut conn, JDOE_DN, &AttributeMutation::delete_value("description", "X"))
            .await
            .unwrap();
        assert_eq!(
            pool.read_attribute(&mut conn, JDOE_DN, "description").await.unwrap(),
            Some(vec!["Y".to_string()])
        );

        // The server decides whether the value exists
        let err = pool
            .apply_mutation(&mut conn, JDOE_DN, &AttributeMutation::delete_value("description", "Z"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ProtocolError");
        assert_eq!(err.result_code(), Some(16));
        assert_eq!(directory.modifications(), 4);
    }

    #[tokio::test]
    async fn test_batch_reports_partial_commit() {
        let directory = MemoryDirectory::example();
        let pool = open(&directory).await;
        let mut conn = pool.borrow().await.unwrap();

        let err = pool
            .apply_batch(
                &mut conn,
                JDOE_DN,
                vec![
                    ("description", "contractor"),
                    ("noSuchAttribute", "x"),
                    ("mail", "john@example.com"),
                ],
            )
            .await
            .unwrap_err();

        match err {
            Error::Batch(batch) => {
                assert_eq!(batch.committed, vec!["description".to_string()]);
                assert_eq!(batch.failed_attribute, "noSuchAttribute");
                assert_eq!(batch.not_attempted, vec!["mail".to_string()]);
                assert_eq!(batch.source.code(), "ProtocolError");
            }
            other => panic!("expected batch error, got {:?}", other),
        }

        // Preceding replacement stayed committed; the later one was never sent
        assert_eq!(
            pool.read_attribute(&mut conn, JDOE_DN, "description").await.unwrap(),
            Some(vec!["contractor".to_string()])
        );
        assert_eq!(
            pool.read_attribute(&mut conn, JDOE_DN, "mail").await.unwrap(),
            Some(vec!["jdoe@example.com".to_string()])
        );
    }

    #[tokio::test]
    async fn test_batch_success_returns_committed_names() {
        let directory = MemoryDirectory::example();
        let pool = open(&directory).await;
        let mut conn = pool.borrow().await.unwrap();

        let committed = pool
            .apply_batch(
                &mut conn,
                JDOE_DN,
                vec![("description", "staff"), ("mail", "john.doe@example.com")],
            )
            .await
            .unwrap();
        assert_eq!(committed, vec!["description", "mail"]);

        pool.update_attributes(&mut conn, JDOE_DN, [("description", "lead")])
            .await
            .unwrap();
        assert_eq!(
            pool.read_attribute(&mut conn, JDOE_DN, "description").await.unwrap(),
            Some(vec!["lead".to_string()])
        );
    }

    #[tokio::test]
    async fn test_read_of_missing_entry_is_not_found() {
        let directory = MemoryDirectory::example();
        let pool = open(&directory).await;
        let mut conn = pool.borrow().await.unwrap();

        let err = pool
            .read_attribute(&mut conn, "uid=ghost,ou=people,dc=example,dc=com", "cn")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_root_dse() {
        let directory = MemoryDirectory::example();
        let pool = open(&directory).await;
        let mut conn = pool.borrow().await.unwrap();

        let dse = pool.root_dse(&mut conn).await.unwrap();
        assert_eq!(dse.naming_contexts, vec!["dc=example,dc=com".to_string()]);
        assert_eq!(dse.supported_ldap_version, vec!["3".to_string()]);
    }
}
