//! Tests for the registry contract, run against both registry implementations

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cas_ticket_core::codec::TypeTable;
use cas_ticket_core::error::{StoreError, TicketError};
use cas_ticket_core::registry::{
    DefaultTicketRegistry, DistributedTicketRegistry, InMemoryTicketStore, TicketLocks, TicketStore,
};
use cas_ticket_core::{
    Authentication, ExpirationPolicy, SerializerPool, Service, Ticket, TicketCipher, TicketGrantingTicket, TicketKind,
    TicketRegistry,
};
use pretty_assertions::assert_eq;

fn authentication(principal: &str) -> Authentication {
    Authentication::builder(principal)
        .success("AcceptUsersAuthenticationHandler")
        .credential("UsernamePasswordCredential")
        .build()
        .unwrap()
}

fn service(id: &str) -> Service {
    Service::new(id).unwrap()
}

fn tgt(id: &str) -> Ticket {
    Ticket::from(TicketGrantingTicket::new(id, authentication("casuser"), ExpirationPolicy::NeverExpires).unwrap())
}

fn registries() -> Vec<(&'static str, Arc<dyn TicketRegistry>)> {
    vec![
        ("default", Arc::new(DefaultTicketRegistry::new())),
        (
            "distributed",
            Arc::new(DistributedTicketRegistry::new(
                InMemoryTicketStore::new(),
                SerializerPool::new(TypeTable::default(), 8),
            )),
        ),
        (
            "distributed-hashed",
            Arc::new(
                DistributedTicketRegistry::new(InMemoryTicketStore::new(), SerializerPool::new(TypeTable::default(), 8))
                    .with_hashed_ids(true),
            ),
        ),
    ]
}

/// TGT-1 -> ST-1 -> PGT-1, all written through the registry
async fn proxy_chain(registry: &dyn TicketRegistry) {
    registry.add_ticket(tgt("TGT-1")).await;
    registry
        .grant_service_ticket(
            "TGT-1",
            "ST-1",
            service("https://proxy.example.org"),
            ExpirationPolicy::multi_time_use_or_timeout(1, 10),
            true,
            true,
        )
        .await
        .unwrap();
    registry
        .grant_proxy_granting_ticket(
            "ST-1",
            "PGT-1",
            authentication("https://proxy.example.org/callback"),
            ExpirationPolicy::NeverExpires,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_granting_ticket_cascades() {
    for (name, registry) in registries() {
        proxy_chain(registry.as_ref()).await;
        assert_eq!(registry.size().await, 3, "{}", name);

        assert_eq!(registry.delete_ticket("TGT-1").await, 3, "{}", name);
        for id in ["TGT-1", "ST-1", "PGT-1"] {
            assert!(registry.get_ticket(id).await.is_none(), "{} still holds {}", name, id);
        }
        assert_eq!(registry.size().await, 0, "{}", name);
        assert_eq!(registry.delete_ticket("TGT-1").await, 0, "{}", name);
    }
}

#[tokio::test]
async fn test_cascade_reaches_proxy_tickets() {
    for (name, registry) in registries() {
        proxy_chain(registry.as_ref()).await;
        let proxy_ticket = registry
            .grant_service_ticket(
                "PGT-1",
                "PT-1",
                service("https://backend.example.org"),
                ExpirationPolicy::multi_time_use_or_timeout(1, 10),
                false,
                true,
            )
            .await
            .unwrap();
        assert!(proxy_ticket.is_proxy());
        assert_eq!(
            registry.get_ticket("PT-1").await.map(|t| t.kind()),
            Some(TicketKind::ProxyTicket),
            "{}",
            name
        );

        assert_eq!(registry.delete_ticket("TGT-1").await, 4, "{}", name);
        assert_eq!(registry.size().await, 0, "{}", name);
    }
}

#[tokio::test]
async fn test_deleting_service_ticket_leaves_session() {
    for (name, registry) in registries() {
        proxy_chain(registry.as_ref()).await;
        assert_eq!(registry.delete_ticket("ST-1").await, 1, "{}", name);
        assert!(registry.get_ticket("TGT-1").await.is_some(), "{}", name);
        assert!(registry.get_ticket("PGT-1").await.is_some(), "{}", name);
    }
}

#[tokio::test]
async fn test_type_mismatch_is_not_not_found() {
    for (name, registry) in registries() {
        registry.add_ticket(tgt("TGT-1")).await;

        let result = registry.get_ticket_of_kind("TGT-1", TicketKind::ServiceTicket).await;
        assert_eq!(
            result.unwrap_err(),
            TicketError::TypeMismatch {
                id: "TGT-1".to_string(),
                actual: TicketKind::TicketGrantingTicket,
                expected: TicketKind::ServiceTicket,
            },
            "{}",
            name
        );
        assert_eq!(registry.size().await, 1, "{}", name);
        assert!(registry.get_ticket("TGT-1").await.is_some(), "{}", name);

        assert_eq!(
            registry
                .get_ticket_of_kind("TGT-404", TicketKind::ServiceTicket)
                .await
                .unwrap(),
            None,
            "{}",
            name
        );
    }
}

#[tokio::test]
async fn test_proxy_granting_ticket_is_a_granting_ticket() {
    for (name, registry) in registries() {
        proxy_chain(registry.as_ref()).await;
        let pgt = registry
            .get_ticket_of_kind("PGT-1", TicketKind::TicketGrantingTicket)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pgt.kind(), TicketKind::ProxyGrantingTicket, "{}", name);
        assert_eq!(pgt.parent_id(), Some("TGT-1"), "{}", name);
        assert_eq!(registry.session_count().await, 2, "{}", name);
        assert_eq!(registry.service_ticket_count().await, 1, "{}", name);
    }
}

#[tokio::test]
async fn test_grant_writes_through() {
    for (name, registry) in registries() {
        registry.add_ticket(tgt("TGT-1")).await;
        let first = registry
            .grant_service_ticket(
                "TGT-1",
                "ST-1",
                service("https://app.example.org"),
                ExpirationPolicy::NeverExpires,
                true,
                true,
            )
            .await
            .unwrap();
        assert!(first.is_from_new_login(), "{}", name);

        let stored = registry.get_ticket("TGT-1").await.unwrap();
        let stored = stored.as_ticket_granting_ticket().unwrap();
        assert_eq!(stored.services().len(), 1, "{}", name);
        assert_eq!(stored.state().count_of_uses(), 1, "{}", name);

        let second = registry
            .grant_service_ticket(
                "TGT-1",
                "ST-2",
                service("https://app.example.org/?ticket=x"),
                ExpirationPolicy::NeverExpires,
                true,
                true,
            )
            .await
            .unwrap();
        assert!(!second.is_from_new_login(), "{}", name);
        let stored = registry.get_ticket("TGT-1").await.unwrap();
        assert_eq!(stored.child_ids(), vec!["ST-2".to_string()], "{}", name);
    }
}

#[tokio::test]
async fn test_second_proxy_granting_ticket_rejected() {
    for (name, registry) in registries() {
        proxy_chain(registry.as_ref()).await;
        let result = registry
            .grant_proxy_granting_ticket("ST-1", "PGT-2", authentication("proxy"), ExpirationPolicy::NeverExpires)
            .await;
        assert_eq!(
            result.unwrap_err(),
            TicketError::ProxyGrantingTicketAlreadyGranted("ST-1".to_string()),
            "{}",
            name
        );
        assert!(registry.get_ticket("PGT-2").await.is_none(), "{}", name);
    }
}

#[tokio::test]
async fn test_mark_expired_reaches_chained_tickets() {
    for (name, registry) in registries() {
        proxy_chain(registry.as_ref()).await;
        registry.mark_ticket_expired("TGT-1").await.unwrap();

        for id in ["ST-1", "PGT-1"] {
            let ticket = registry.get_ticket(id).await.unwrap();
            assert!(!ticket.is_expired_locally(), "{}", name);
            assert!(registry.is_ticket_expired(&ticket).await, "{} {}", name, id);
        }

        let result = registry
            .grant_service_ticket(
                "PGT-1",
                "PT-1",
                service("https://backend.example.org"),
                ExpirationPolicy::NeverExpires,
                false,
                true,
            )
            .await;
        assert_eq!(result.unwrap_err(), TicketError::Expired("PGT-1".to_string()), "{}", name);
        assert_eq!(
            registry.mark_ticket_expired("TGT-404").await.unwrap_err(),
            TicketError::NotFound("TGT-404".to_string())
        );
    }
}

#[tokio::test]
async fn test_validate_service_ticket() {
    for (name, registry) in registries() {
        registry.add_ticket(tgt("TGT-1")).await;
        for id in ["ST-1", "ST-2"] {
            registry
                .grant_service_ticket(
                    "TGT-1",
                    id,
                    service("https://app.example.org"),
                    ExpirationPolicy::multi_time_use_or_timeout(1, 10),
                    false,
                    false,
                )
                .await
                .unwrap();
        }

        let validated = registry
            .validate_service_ticket("ST-1", &service("https://app.example.org?ticket=ST-1"))
            .await
            .unwrap();
        assert_eq!(validated.state().count_of_uses(), 1, "{}", name);
        assert!(registry.get_ticket("ST-1").await.is_none(), "{}", name);
        assert_eq!(
            registry
                .validate_service_ticket("ST-1", &service("https://app.example.org"))
                .await
                .unwrap_err(),
            TicketError::NotFound("ST-1".to_string())
        );

        let err = registry
            .validate_service_ticket("ST-2", &service("https://evil.example.org"))
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::UnrecognizableService { code: "INVALID_SERVICE", .. }));
        assert!(registry.get_ticket("ST-2").await.is_none(), "{}", name);

        assert!(matches!(
            registry
                .validate_service_ticket("TGT-1", &service("https://app.example.org"))
                .await,
            Err(TicketError::TypeMismatch { .. })
        ));
    }
}

#[tokio::test]
async fn test_multi_use_ticket_survives_validation() {
    let registry = DefaultTicketRegistry::new();
    registry.add_ticket(tgt("TGT-1")).await;
    registry
        .grant_service_ticket(
            "TGT-1",
            "ST-1",
            service("https://app.example.org"),
            ExpirationPolicy::multi_time_use_or_timeout(3, 10),
            false,
            true,
        )
        .await
        .unwrap();

    let app = service("https://app.example.org");
    registry.validate_service_ticket("ST-1", &app).await.unwrap();
    registry.validate_service_ticket("ST-1", &app).await.unwrap();
    assert_eq!(registry.get_ticket("ST-1").await.unwrap().count_of_uses(), 2);

    registry.validate_service_ticket("ST-1", &app).await.unwrap();
    assert!(registry.get_ticket("ST-1").await.is_none());
}

#[tokio::test]
async fn test_concurrent_grants_are_not_lost() {
    let registry = Arc::new(DistributedTicketRegistry::new(
        InMemoryTicketStore::new(),
        SerializerPool::new(TypeTable::default(), 4),
    ));
    registry.add_ticket(tgt("TGT-1")).await;

    let mut handles = Vec::new();
    for i in 0..32 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry
                .grant_service_ticket(
                    "TGT-1",
                    &format!("ST-{}", i),
                    service(&format!("https://app{}.example.org", i)),
                    ExpirationPolicy::NeverExpires,
                    false,
                    false,
                )
                .await
                .unwrap()
        }));
    }
    let mut new_logins = 0;
    for handle in handles {
        if handle.await.unwrap().is_from_new_login() {
            new_logins += 1;
        }
    }

    let stored = registry.get_ticket("TGT-1").await.unwrap();
    assert_eq!(stored.as_ticket_granting_ticket().unwrap().services().len(), 32);
    assert_eq!(stored.count_of_uses(), 32);
    assert_eq!(new_logins, 1);
    assert!(registry.pool().peak_in_use() <= 4);
}

#[tokio::test]
async fn test_nodes_sharing_a_store_see_each_other() {
    let store = Arc::new(InMemoryTicketStore::new());
    let node_a = DistributedTicketRegistry::new(store.clone(), SerializerPool::default()).with_hashed_ids(true);
    let node_b = DistributedTicketRegistry::new(store.clone(), SerializerPool::default()).with_hashed_ids(true);

    proxy_chain(&node_a).await;
    assert!(store.get("TGT-1").await.unwrap().is_none());
    assert!(store.get(&node_a.store_key("TGT-1")).await.unwrap().is_some());

    node_b.mark_ticket_expired("TGT-1").await.unwrap();
    assert!(node_a.get_ticket("TGT-1").await.unwrap().is_expired_locally());
    assert_eq!(node_b.delete_ticket("TGT-1").await, 3);
    assert_eq!(node_a.size().await, 0);
}

#[tokio::test]
async fn test_store_ttl_follows_policy() {
    let registry = DistributedTicketRegistry::new(InMemoryTicketStore::new(), SerializerPool::default());
    registry
        .add_ticket(Ticket::from(
            TicketGrantingTicket::new("TGT-1", authentication("casuser"), ExpirationPolicy::AlwaysExpires).unwrap(),
        ))
        .await;
    assert!(registry.get_ticket("TGT-1").await.is_none());
    assert_eq!(registry.size().await, 0);
}

/// Store whose every operation fails
struct UnavailableStore;

#[async_trait]
impl TicketStore for UnavailableStore {
    async fn put(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn values(&self) -> Result<Vec<Vec<u8>>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn len(&self) -> Result<u64, StoreError> {
        Err(StoreError::Operation("timeout".to_string()))
    }
}

#[tokio::test]
async fn test_store_failures_degrade() {
    let registry = DistributedTicketRegistry::new(UnavailableStore, SerializerPool::default());

    registry.add_ticket(tgt("TGT-1")).await;
    assert!(registry.get_ticket("TGT-1").await.is_none());
    assert!(registry.get_tickets().await.is_empty());
    assert_eq!(registry.size().await, 0);
    assert_eq!(registry.delete_ticket("TGT-1").await, 0);
    assert!(!registry.delete_single_ticket("TGT-1").await);
    assert_eq!(
        registry.mark_ticket_expired("TGT-1").await.unwrap_err(),
        TicketError::NotFound("TGT-1".to_string())
    );
    assert_eq!(registry.pool().in_use(), 0);
}

#[tokio::test]
async fn test_undecodable_entries_are_skipped() {
    let store = Arc::new(InMemoryTicketStore::new());
    let registry = DistributedTicketRegistry::new(store.clone(), SerializerPool::default());
    registry.add_ticket(tgt("TGT-1")).await;

    store.put("TGT-2", vec![0xCA, 1, 2, 3], None).await.unwrap();
    let foreign = DistributedTicketRegistry::new(
        store.clone(),
        SerializerPool::new(TypeTable::with_ticket_types().register_name("Extra").build(), 1),
    );
    foreign.add_ticket(tgt("TGT-3")).await;

    assert!(registry.get_ticket("TGT-2").await.is_none());
    assert!(registry.get_ticket("TGT-3").await.is_none());
    let tickets = registry.get_tickets().await;
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].id(), "TGT-1");
    assert_eq!(registry.size().await, 3);
}

#[tokio::test(start_paused = true)]
async fn test_evicted_session_expires_its_service_tickets() {
    let registry = DistributedTicketRegistry::new(InMemoryTicketStore::new(), SerializerPool::default());
    registry
        .add_ticket(Ticket::from(
            TicketGrantingTicket::new("TGT-1", authentication("casuser"), ExpirationPolicy::hard_timeout(1)).unwrap(),
        ))
        .await;
    registry
        .grant_service_ticket(
            "TGT-1",
            "ST-1",
            service("https://app.example.org"),
            ExpirationPolicy::multi_time_use_or_timeout(1, 60),
            false,
            true,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert!(registry.get_ticket("TGT-1").await.is_none());

    let service_ticket = registry.get_ticket("ST-1").await.unwrap();
    assert!(!service_ticket.is_expired_locally());
    assert!(registry.is_ticket_expired(&service_ticket).await);
    assert_eq!(
        registry
            .validate_service_ticket("ST-1", &service("https://app.example.org"))
            .await
            .unwrap_err(),
        TicketError::Expired("ST-1".to_string())
    );
    assert!(registry.get_ticket("ST-1").await.is_none());
}

#[tokio::test]
async fn test_removed_session_expires_its_service_tickets() {
    for (name, registry) in registries() {
        proxy_chain(registry.as_ref()).await;
        assert!(registry.delete_single_ticket("TGT-1").await, "{}", name);

        for id in ["ST-1", "PGT-1"] {
            let ticket = registry.get_ticket(id).await.unwrap();
            assert!(registry.is_ticket_expired(&ticket).await, "{} {}", name, id);
        }
        assert!(matches!(
            registry
                .grant_service_ticket(
                    "PGT-1",
                    "PT-1",
                    service("https://backend.example.org"),
                    ExpirationPolicy::NeverExpires,
                    false,
                    true,
                )
                .await,
            Err(TicketError::Expired(_))
        ));
    }
}

/// Registry whose reads of TGT-1 are slow
struct SlowSessionRegistry {
    inner: DefaultTicketRegistry,
}

#[async_trait]
impl TicketRegistry for SlowSessionRegistry {
    async fn add_ticket(&self, ticket: Ticket) {
        self.inner.add_ticket(ticket).await
    }

    async fn get_ticket(&self, id: &str) -> Option<Ticket> {
        if id == "TGT-1" {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.inner.get_ticket(id).await
    }

    async fn update_ticket(&self, ticket: Ticket) {
        self.inner.update_ticket(ticket).await
    }

    async fn delete_single_ticket(&self, id: &str) -> bool {
        self.inner.delete_single_ticket(id).await
    }

    async fn get_tickets(&self) -> Vec<Ticket> {
        self.inner.get_tickets().await
    }

    fn ticket_locks(&self) -> &TicketLocks {
        self.inner.ticket_locks()
    }
}

#[tokio::test(start_paused = true)]
async fn test_logout_during_grant_removes_new_ticket() {
    let registry = Arc::new(SlowSessionRegistry {
        inner: DefaultTicketRegistry::new(),
    });
    registry.add_ticket(tgt("TGT-1")).await;

    let grant = tokio::spawn({
        let registry = registry.clone();
        async move {
            registry
                .grant_service_ticket(
                    "TGT-1",
                    "ST-1",
                    service("https://app.example.org"),
                    ExpirationPolicy::NeverExpires,
                    false,
                    true,
                )
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(registry.delete_ticket("TGT-1").await, 2);
    assert!(grant.await.unwrap().is_ok());
    assert!(registry.inner.get_ticket("ST-1").await.is_none());
    assert_eq!(registry.inner.size().await, 0);
    assert!(registry.ticket_locks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_grant_after_logout_finds_nothing() {
    let registry = Arc::new(SlowSessionRegistry {
        inner: DefaultTicketRegistry::new(),
    });
    registry.add_ticket(tgt("TGT-1")).await;

    let logout = tokio::spawn({
        let registry = registry.clone();
        async move { registry.delete_ticket("TGT-1").await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let granted = registry
        .grant_service_ticket(
            "TGT-1",
            "ST-1",
            service("https://app.example.org"),
            ExpirationPolicy::NeverExpires,
            false,
            true,
        )
        .await;
    assert_eq!(granted.unwrap_err(), TicketError::NotFound("TGT-1".to_string()));
    assert_eq!(logout.await.unwrap(), 1);
    assert_eq!(registry.inner.size().await, 0);
}

#[tokio::test]
async fn test_unknown_ids_leave_no_locks() {
    for (name, registry) in registries() {
        let app = service("https://app.example.org");
        for i in 0..1_000 {
            let id = format!("ST-unknown-{}", i);
            assert!(registry.validate_service_ticket(&id, &app).await.is_err(), "{}", name);
        }
        assert!(registry
            .grant_service_ticket("TGT-unknown", "ST-1", app.clone(), ExpirationPolicy::NeverExpires, false, true)
            .await
            .is_err());
        assert!(registry.mark_ticket_expired("TGT-unknown").await.is_err());
        assert_eq!(registry.delete_ticket("TGT-unknown").await, 0);
        assert!(registry.ticket_locks().is_empty(), "{} kept {} locks", name, registry.ticket_locks().len());

        proxy_chain(registry.as_ref()).await;
        assert_eq!(registry.delete_ticket("TGT-1").await, 3, "{}", name);
        assert!(registry.ticket_locks().is_empty(), "{}", name);
    }
}

const ENCRYPTION_KEY: &str = "8f0e5c3a1b2d4e6f708192a3b4c5d6e7f8091a2b3c4d5e6f708192a3b4c5d6e7";

#[tokio::test]
async fn test_encrypted_frames() {
    let store = Arc::new(InMemoryTicketStore::new());
    let registry = DistributedTicketRegistry::new(store.clone(), SerializerPool::default())
        .with_cipher(Some(TicketCipher::from_hex_key(ENCRYPTION_KEY).unwrap()));
    assert!(registry.is_encrypted());

    proxy_chain(&registry).await;
    let stored = registry.get_ticket("ST-1").await.unwrap();
    assert_eq!(stored.parent_id(), Some("TGT-1"));
    assert_eq!(
        registry
            .get_ticket("TGT-1")
            .await
            .unwrap()
            .as_ticket_granting_ticket()
            .unwrap()
            .authentication()
            .principal_id(),
        "casuser"
    );

    for value in store.values().await.unwrap() {
        assert!(!value.windows(5).any(|w| w == b"TGT-1"));
        assert!(!value.windows(7).any(|w| w == b"casuser"));
    }

    let plain = DistributedTicketRegistry::new(store.clone(), SerializerPool::default());
    assert!(plain.get_ticket("TGT-1").await.is_none());
    assert!(plain.get_tickets().await.is_empty());
}

#[tokio::test]
async fn test_wrong_key_reads_nothing() {
    let store = Arc::new(InMemoryTicketStore::new());
    let node_a = DistributedTicketRegistry::new(store.clone(), SerializerPool::default())
        .with_cipher(Some(TicketCipher::from_hex_key(ENCRYPTION_KEY).unwrap()));
    let node_b = DistributedTicketRegistry::new(store.clone(), SerializerPool::default())
        .with_cipher(Some(TicketCipher::new(&[0x42; 32]).unwrap()));

    node_a.add_ticket(tgt("TGT-1")).await;
    assert!(node_b.get_ticket("TGT-1").await.is_none());
    assert!(node_b.get_tickets().await.is_empty());
    assert_eq!(node_b.size().await, 1);
    assert_eq!(node_b.pool().in_use(), 0);

    let node_c = DistributedTicketRegistry::new(store.clone(), SerializerPool::default())
        .with_cipher(Some(TicketCipher::from_hex_key(ENCRYPTION_KEY).unwrap()));
    assert!(node_c.get_ticket("TGT-1").await.is_some());
}
