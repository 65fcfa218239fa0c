use super::*;

#[tokio::test]
async fn register_assigns_identity_and_membership() {
    let registry = Registry::new();
    let connection_id = Uuid::new_v4();

    let participant = registry.register(connection_id, "r1", Some("ada")).await;

    assert_eq!(participant.connection_id, connection_id);
    assert_eq!(participant.room_id, "r1");
    assert_eq!(participant.name, "ada");
    assert!(!participant.color.is_empty());

    let members = registry.members_of("r1").await;
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].id, participant.id);
}

#[tokio::test]
async fn missing_or_blank_name_gets_placeholder() {
    let registry = Registry::new();

    let anon = registry.register(Uuid::new_v4(), "r1", None).await;
    let blank = registry.register(Uuid::new_v4(), "r1", Some("   ")).await;

    assert!(anon.name.starts_with("User "));
    assert!(blank.name.starts_with("User "));
    // Placeholder embeds the first 8 chars of the participant id.
    assert!(anon.name.ends_with(&anon.id.to_string()[..8]));
}

#[tokio::test]
async fn colors_rotate_round_robin_and_wrap() {
    let registry = Registry::new();

    let first = registry.register(Uuid::new_v4(), "r1", Some("a")).await;
    let second = registry.register(Uuid::new_v4(), "r1", Some("b")).await;
    assert_ne!(first.color, second.color);

    // Exhaust the palette; the 17th assignment wraps back to the first color.
    for i in 0..14 {
        registry.register(Uuid::new_v4(), "r1", Some(&format!("p{i}"))).await;
    }
    let wrapped = registry.register(Uuid::new_v4(), "r1", Some("q")).await;
    assert_eq!(wrapped.color, first.color);
}

#[tokio::test]
async fn lookup_resolves_only_registered_connections() {
    let registry = Registry::new();
    let connection_id = Uuid::new_v4();

    assert!(registry.lookup(connection_id).await.is_none());

    let participant = registry.register(connection_id, "r1", Some("ada")).await;
    let found = registry.lookup(connection_id).await.expect("registered");
    assert_eq!(found.id, participant.id);
}

#[tokio::test]
async fn unregister_removes_membership_and_empty_room_entry() {
    let registry = Registry::new();
    let conn_a = Uuid::new_v4();
    let conn_b = Uuid::new_v4();

    registry.register(conn_a, "r1", Some("a")).await;
    registry.register(conn_b, "r1", Some("b")).await;

    let removed = registry.unregister(conn_a).await.expect("was registered");
    assert_eq!(removed.name, "a");
    assert_eq!(registry.members_of("r1").await.len(), 1);
    assert!(registry.lookup(conn_a).await.is_none());

    registry.unregister(conn_b).await;
    assert!(registry.members_of("r1").await.is_empty());

    // Second unregister is a no-op, not an error.
    assert!(registry.unregister(conn_b).await.is_none());
}

#[tokio::test]
async fn rooms_are_isolated() {
    let registry = Registry::new();
    registry.register(Uuid::new_v4(), "r1", Some("a")).await;
    registry.register(Uuid::new_v4(), "r2", Some("b")).await;

    let r1 = registry.members_of("r1").await;
    let r2 = registry.members_of("r2").await;
    assert_eq!(r1.len(), 1);
    assert_eq!(r2.len(), 1);
    assert_ne!(r1[0].name, r2[0].name);
}

#[tokio::test]
async fn empty_string_room_is_its_own_bucket() {
    let registry = Registry::new();
    registry.register(Uuid::new_v4(), "", Some("a")).await;
    registry.register(Uuid::new_v4(), "r1", Some("b")).await;

    assert_eq!(registry.members_of("").await.len(), 1);
    assert_eq!(registry.members_of("r1").await.len(), 1);
}
