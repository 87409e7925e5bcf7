//! List domains and their applications.
//!
//! Run:
//! `BROKER_SERVER=<host> BROKER_TOKEN=<token> cargo run --example list_domains`

use broker_client::{Client, ClientOptions};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Ok(server) = std::env::var("BROKER_SERVER") else {
        eprintln!("Set BROKER_SERVER before running this example.");
        std::process::exit(2);
    };
    let Ok(token) = std::env::var("BROKER_TOKEN") else {
        eprintln!("Set BROKER_TOKEN before running this example.");
        std::process::exit(2);
    };

    let client = Client::new(ClientOptions::new().server(server).token(token))?;
    for domain in client.domains()? {
        println!("{}", domain.id);
        for application in domain.applications()? {
            println!("  {} {}", application.name, application.app_url.unwrap_or_default());
        }
    }
    Ok(())
}
