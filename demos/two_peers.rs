extern crate peerchat_dht;

use peerchat_dht::User;

fn main() {
    let alice = User::register("Alice", "127.0.0.1:4444", "").unwrap();
    let frans = User::register("Frans", "127.0.0.1:5555", &alice.address()).unwrap();

    assert_eq!(frans.find_user("Alice").unwrap(), alice.address());
    assert_eq!(alice.find_user("Frans").unwrap(), frans.address());

    alice.send_message("Frans", "Hi Frans! Wanna play squash?").unwrap();
    frans.send_message("Alice", "Sure Alice, what time?").unwrap();

    for message in frans.take_messages().into_iter().chain(alice.take_messages()) {
        println!("{} says: {}", message.sender.addr, message.text);
    }

    alice.shutdown().unwrap();
    frans.shutdown().unwrap();
}
