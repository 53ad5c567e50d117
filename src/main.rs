#[macro_use]
extern crate log;
extern crate peerchat_dht;
extern crate simplelog;

use simplelog::{ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use std::collections::HashMap;
use std::io;

use peerchat_dht::User;

const USAGE: &str = "\
register <name> <addr> [bootstrap]
find <name> <target>
send <name> <target> <text>
inbox <name>
kill <name>";

fn main() {
    let logger_config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Error)
        .set_target_level(LevelFilter::Off)
        .set_location_level(LevelFilter::Off)
        .build();
    if CombinedLogger::init(vec![TermLogger::new(
        LevelFilter::Info,
        logger_config,
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )])
    .is_err()
    {
        eprintln!("Could not initialize logger.");
    }

    let mut users: HashMap<String, User> = HashMap::new();
    let input = io::stdin();

    loop {
        let mut buffer = String::new();
        println!("Ready for input!");
        match input.read_line(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(_) => {},
        }
        let args: Vec<&str> = buffer.trim_end().splitn(4, ' ').collect();
        match args.as_slice() {
            ["register", name, addr] | ["register", name, addr, ""] => {
                register(&mut users, name, addr, "");
            },
            ["register", name, addr, bootstrap] => register(&mut users, name, addr, bootstrap),
            ["find", name, target] => match users.get(*name).map(|user| user.find_user(target)) {
                Some(Ok(addr)) => info!("{} is at {}", target, addr),
                Some(Err(err)) => error!("{}", err),
                None => error!("No local user {}", name),
            },
            ["send", name, target, text] => {
                match users.get(*name).map(|user| user.send_message(target, text)) {
                    Some(Ok(())) => info!("Delivered to {}", target),
                    Some(Err(err)) => error!("{}", err),
                    None => error!("No local user {}", name),
                }
            },
            ["inbox", name] => match users.get(*name) {
                Some(user) => {
                    for message in user.take_messages() {
                        println!("[{}] {}", message.sender.addr, message.text);
                    }
                },
                None => error!("No local user {}", name),
            },
            ["kill", name] => match users.remove(*name).map(User::shutdown) {
                Some(Ok(())) => info!("Killed {}", name),
                Some(Err(err)) => error!("{}", err),
                None => error!("No local user {}", name),
            },
            [""] => {},
            _ => println!("{}", USAGE),
        }
    }
}

fn register(users: &mut HashMap<String, User>, name: &str, addr: &str, bootstrap: &str) {
    match User::register(name, addr, bootstrap) {
        Ok(user) => {
            info!("Registered {} at {}", name, user.address());
            users.insert(name.to_string(), user);
        },
        Err(err) => error!("Could not register {}: {}", name, err),
    }
}
