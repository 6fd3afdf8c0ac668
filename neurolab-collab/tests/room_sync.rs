//! Several sessions sharing one in-process room, plus saving and
//! restoring circuit versions through a session.

use std::sync::Arc;

use neurolab_collab::broadcast::{BroadcastGroup, RoomPublisher};
use neurolab_collab::channel::channel_name;
use neurolab_collab::config::SessionConfig;
use neurolab_collab::protocol::{ChannelMessage, PeerInfo};
use neurolab_collab::session::{CollaborativeHistory, Identity, RemoteOutcome};
use neurolab_collab::storage::{RocksVersionStore, StoreConfig, VersionStore};
use neurolab_core::{Connection, ConnectionType, MergeOptions, Neuron, NeuronKind};
use tempfile::TempDir;
use tokio::sync::broadcast;
use uuid::Uuid;

struct Member {
    peer_id: Uuid,
    rx: broadcast::Receiver<Arc<Vec<u8>>>,
    session: CollaborativeHistory<RoomPublisher>,
}

impl Member {
    async fn join(group: &Arc<BroadcastGroup>, user_id: &str, name: &str) -> Self {
        let info = PeerInfo::new(user_id, name);
        let peer_id = info.peer_id;
        let rx = group.add_peer(info).await;
        let mut session = CollaborativeHistory::new(
            Identity::new(user_id, name),
            "lab",
            &SessionConfig::default(),
            RoomPublisher::new(group.clone(), peer_id),
        );
        session.init(&[], &[]);
        session.mark_live();
        Self { peer_id, rx, session }
    }

    /// Apply everything buffered for this member.
    fn drain(&mut self) -> Vec<RemoteOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(bytes) = self.rx.try_recv() {
            let msg = ChannelMessage::decode(&bytes).unwrap();
            if msg.peer_id == self.peer_id || !msg.is_history() {
                continue;
            }
            outcomes.push(self.session.handle_remote(msg.history_event().unwrap()));
        }
        outcomes
    }
}

fn reflex_arc() -> (Vec<Neuron>, Vec<Connection>) {
    (
        vec![
            Neuron::new("s1", NeuronKind::Sensory, 100.0, 100.0),
            Neuron::new("m1", NeuronKind::Motor, 300.0, 100.0),
        ],
        vec![Connection::between("s1", "m1", 0.9, ConnectionType::Excitatory)],
    )
}

#[tokio::test]
async fn test_three_members_stay_in_step() {
    let group = Arc::new(BroadcastGroup::new(32));
    let mut alice = Member::join(&group, "u-alice", "Alice").await;
    let mut bob = Member::join(&group, "u-bob", "Bob").await;
    let mut carol = Member::join(&group, "u-carol", "Carol").await;

    let (neurons, connections) = reflex_arc();
    alice.session.push_state(&neurons, &connections, "Built reflex arc");

    assert!(alice.drain().is_empty());
    for member in [&mut bob, &mut carol] {
        let outcomes = member.drain();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], RemoteOutcome::Applied { .. }));
        assert_eq!(member.session.current().unwrap().neurons, neurons);
    }

    // The canvas re-reports the applied graph; the guard swallows it.
    assert!(!bob.session.push_state(&neurons, &connections, "echo").is_recorded());
    assert!(bob.drain().is_empty());
    assert!(alice.drain().is_empty());

    let stats = group.stats().await;
    assert_eq!(stats.active_peers, 3);
    assert_eq!(stats.messages_sent, 1);
}

#[tokio::test]
async fn test_import_is_shared_as_one_edit() {
    let group = Arc::new(BroadcastGroup::new(32));
    let mut alice = Member::join(&group, "u-alice", "Alice").await;
    let mut bob = Member::join(&group, "u-bob", "Bob").await;

    let (neurons, connections) = reflex_arc();
    alice.session.push_state(&neurons, &connections, "Built reflex arc");
    bob.drain();

    // Same ids, same spot: "s1" is skipped, "i1" lands beside the arc.
    let incoming = vec![
        Neuron::new("s1", NeuronKind::Sensory, 100.0, 100.0),
        Neuron::new("i1", NeuronKind::Interneuron, 105.0, 95.0),
    ];
    let (result, outcome) = alice
        .session
        .import_circuit(&incoming, &[], 1200.0, 800.0, &MergeOptions::default());
    assert!(outcome.is_recorded());
    assert_eq!(result.stats.neurons_added, 1);
    assert_eq!(result.stats.neurons_skipped, 1);

    let outcomes = bob.drain();
    assert_eq!(outcomes.len(), 1);
    let graph = outcomes[0].graph().unwrap();
    assert_eq!(graph.neurons.len(), 3);
    assert_eq!(bob.session.entries().last().unwrap().action, "Imported circuit");
}

#[tokio::test]
async fn test_lagging_member_converges_on_next_message() {
    let group = Arc::new(BroadcastGroup::new(2));
    let mut alice = Member::join(&group, "u-alice", "Alice").await;
    let mut bob = Member::join(&group, "u-bob", "Bob").await;

    for i in 1..=5 {
        let neurons: Vec<Neuron> = (0..i)
            .map(|n| Neuron::new(format!("n{n}"), NeuronKind::Excitatory, n as f64 * 60.0, 0.0))
            .collect();
        alice.session.push_state(&neurons, &[], format!("step {i}"));
    }

    // Bob's receiver overflowed; the first read reports the lag.
    assert!(matches!(bob.rx.try_recv(), Err(broadcast::error::TryRecvError::Lagged(_))));
    let outcomes = bob.drain();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(bob.session.current().unwrap().neurons.len(), 5);
    alice.drain();
}

#[test]
fn test_saved_version_restores_into_session() {
    let dir = TempDir::new().unwrap();
    let store = RocksVersionStore::open(StoreConfig::for_testing(dir.path())).unwrap();
    let group = Arc::new(BroadcastGroup::new(8));
    let mut session = CollaborativeHistory::new(
        Identity::new("u-alice", "Alice"),
        "lab",
        &SessionConfig::default(),
        RoomPublisher::new(group.clone(), Uuid::new_v4()),
    );
    session.init(&[], &[]);

    let (neurons, connections) = reflex_arc();
    session.push_state(&neurons, &connections, "Built reflex arc");
    let saved = store
        .save_version("reflex", "Reflex arc", Some("first draft"), session.current().unwrap())
        .unwrap();
    assert_eq!(saved.version, 1);

    session.push_state(&[], &[], "Cleared canvas");
    assert!(session.current().unwrap().neurons.is_empty());

    let version = store.load_version("reflex", 1).unwrap();
    assert!(session.restore_version(&version.state).is_recorded());

    let current = session.current().unwrap();
    assert_eq!(current.neurons, neurons);
    assert_eq!(current.connections, connections);
    assert_eq!(session.entries().last().unwrap().action, "Restored: Built reflex arc");
    assert_eq!(session.channel(), channel_name("lab"));
}
