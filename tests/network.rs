extern crate peerchat_dht;

use peerchat_dht::{Error, Key, Node, NodeState, User};
use std::collections::HashMap;
use std::net::UdpSocket;
use std::time::{Duration, Instant};

const LOCALHOST: &str = "127.0.0.1:0";

fn register_many(count: usize) -> Vec<User> {
    let mut users: Vec<User> = Vec::with_capacity(count);
    for i in 0..count {
        let bootstrap = users.last().map(User::address).unwrap_or_default();
        users.push(User::register(&i.to_string(), LOCALHOST, &bootstrap).unwrap());
    }
    users
}

#[test]
fn two_users_find_each_other() {
    let alice = User::register("Alice", LOCALHOST, "").unwrap();
    let frans = User::register("Frans", LOCALHOST, &alice.address()).unwrap();

    assert_eq!(frans.find_user("Alice").unwrap(), alice.address());
    assert_eq!(alice.find_user("Frans").unwrap(), frans.address());
    assert_eq!(alice.node().known_nodes(), 1);
    assert_eq!(frans.node().known_nodes(), 1);

    // Alice announced before Frans joined, Frans announced to both
    assert_eq!(alice.node().stored_values(), 2);
    assert_eq!(frans.node().stored_values(), 1);
}

#[test]
fn unknown_user_is_not_found() {
    let alice = User::register("Alice", LOCALHOST, "").unwrap();
    let _frans = User::register("Frans", LOCALHOST, &alice.address()).unwrap();

    match alice.find_user("Bob") {
        Err(Error::NotFound(key)) => assert_eq!(key, Key::hash("Bob")),
        other => panic!("expected not found, got {:?}", other),
    }
    match alice.send_message("Bob", "hello?") {
        Err(Error::UserNotFound(name)) => assert_eq!(name, "Bob"),
        other => panic!("expected user not found, got {:?}", other),
    }
}

#[test]
fn messages_arrive_unaltered() {
    let alice = User::register("Alice", LOCALHOST, "").unwrap();
    let frans = User::register("Frans", LOCALHOST, &alice.address()).unwrap();

    let question = "Hi Frans! Wanna play squash?";
    let answer = "Sure Alice, what time? \u{1F3F8}\n\ttomorrow at 7";
    alice.send_message("Frans", question).unwrap();
    frans.send_message("Alice", answer).unwrap();
    alice.send_message("Frans", "").unwrap();

    let received = frans.messages();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].text, question);
    assert_eq!(received[0].sender.addr, alice.address());
    assert_eq!(received[1].text, "");

    let received = alice.take_messages();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].text, answer);
    assert!(alice.messages().is_empty());
}

#[test]
fn message_to_stopped_user_fails() {
    let alice = User::register("Alice", LOCALHOST, "").unwrap();
    let frans = User::register("Frans", LOCALHOST, &alice.address()).unwrap();
    let frans_addr = frans.address();
    frans.shutdown().unwrap();

    match alice.node().send_message(&frans_addr, "are you there?") {
        Err(Error::DeliveryFailed(addr)) => assert_eq!(addr, frans_addr),
        other => panic!("expected delivery failure, got {:?}", other),
    }
}

#[test]
fn many_users_find_each_other() {
    let users = register_many(40);
    for user in &users {
        user.announce_user(user.name(), &user.address()).unwrap();
    }

    let addresses: HashMap<String, String> = users
        .iter()
        .map(|user| (user.name().to_string(), user.address()))
        .collect();
    for user in &users {
        for (name, addr) in &addresses {
            assert_eq!(&user.find_user(name).unwrap(), addr, "{} looking up {}", user.name(), name);
        }
    }
}

#[test]
fn lookups_skip_stopped_users() {
    let mut users = register_many(12);
    let stopped: Vec<User> = users.drain(4..7).collect();
    let stopped_addrs: Vec<String> = stopped.iter().map(User::address).collect();
    for user in stopped {
        user.shutdown().unwrap();
    }

    let closest = users[0].node().find_closest(&Key::hash("anywhere")).unwrap();
    assert_eq!(closest.len(), users.len() - 1);
    assert!(closest.iter().all(|node_data| !stopped_addrs.contains(&node_data.addr)));

    users[0].announce_user("late", "127.0.0.1:9").unwrap();
    for user in &users {
        assert_eq!(user.find_user("late").unwrap(), "127.0.0.1:9");
        for target in &users {
            assert_eq!(user.find_user(target.name()).unwrap(), target.address());
        }
    }
}

#[test]
fn lookup_returns_closest_live_nodes() {
    let users = register_many(10);
    let key = Key::hash("somewhere");

    let closest = users[0].node().find_closest(&key).unwrap();
    assert_eq!(closest.len(), users.len() - 1);
    for pair in closest.windows(2) {
        assert!(pair[0].id.xor(&key) < pair[1].id.xor(&key));
    }
    assert!(closest.iter().all(|node_data| node_data.addr != users[0].address()));
}

#[test]
fn last_announce_wins() {
    let alice = User::register("Alice", LOCALHOST, "").unwrap();
    let frans = User::register("Frans", LOCALHOST, &alice.address()).unwrap();

    frans.announce_user("Alice", "127.0.0.1:9").unwrap();
    assert_eq!(alice.find_user("Alice").unwrap(), "127.0.0.1:9");
    assert_eq!(frans.find_user("Alice").unwrap(), "127.0.0.1:9");
}

#[test]
fn join_through_unreachable_bootstrap_fails() {
    let unused = UdpSocket::bind(LOCALHOST).unwrap();
    let bootstrap = unused.local_addr().unwrap().to_string();
    drop(unused);

    match User::register("Alice", LOCALHOST, &bootstrap) {
        Err(Error::UnreachablePeer(addr)) => assert_eq!(addr, bootstrap),
        Err(err) => panic!("expected unreachable peer, got {:?}", err),
        Ok(_) => panic!("expected unreachable peer"),
    }
}

#[test]
fn shutdown_releases_address() {
    let node = Node::new(LOCALHOST).unwrap();
    let addr = node.node_data().addr;
    assert_eq!(node.state(), NodeState::Serving);

    node.shutdown().unwrap();
    assert_eq!(node.state(), NodeState::Stopped);
    assert!(UdpSocket::bind(&addr).is_ok());
}

#[test]
fn stopped_node_rejects_operations() {
    let node = Node::new(LOCALHOST).unwrap();
    node.shutdown().unwrap();

    let key = Key::hash("Alice");
    assert!(matches!(node.shutdown(), Err(Error::InvalidState)));
    assert!(matches!(node.get(&key), Err(Error::InvalidState)));
    assert!(matches!(node.insert(key, "127.0.0.1:1"), Err(Error::InvalidState)));
    assert!(matches!(node.join("127.0.0.1:1"), Err(Error::InvalidState)));
    assert!(matches!(node.ping("127.0.0.1:1"), Err(Error::InvalidState)));
    assert!(matches!(node.send_message("127.0.0.1:1", "hi"), Err(Error::InvalidState)));
}

#[test]
fn requests_to_stopped_node_time_out() {
    let alive = Node::new(LOCALHOST).unwrap();
    let stopped = Node::new(LOCALHOST).unwrap();
    let stopped_addr = stopped.node_data().addr;
    assert_eq!(alive.ping(&stopped_addr).unwrap(), stopped.node_data());

    stopped.shutdown().unwrap();
    let start = Instant::now();
    assert!(alive.ping(&stopped_addr).is_err());
    assert!(start.elapsed() < Duration::from_secs(5));

    alive.shutdown().unwrap();
}
