mod commands;
mod config;

use std::env;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde_json::{json, Value};

use commands::*;
use config::Config;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  tally-ctl view <content_id>                       - Count one view on the replica");
    eprintln!("  tally-ctl total <content_id>                      - Total views across replicas");
    eprintln!("  tally-ctl counters <content_id>                   - Per-replica counters");
    eprintln!("  tally-ctl stats <content_id>                      - Hard sync, then per-replica counters");
    eprintln!();
    eprintln!("Replication:");
    eprintln!("  tally-ctl sync <content_id> <replica_id> <count>  - Send a sync message as <replica_id>");
    eprintln!("  tally-ctl force-sync <content_id>                 - Make the replica broadcast its partition");
    eprintln!();
    eprintln!("Server operations:");
    eprintln!("  tally-ctl metrics");
    eprintln!("  tally-ctl health");
    eprintln!("  tally-ctl connect <host> <port>                   - Save the default replica to ~/.tallyrc");
    eprintln!();
    eprintln!("Environment variables:");
    eprintln!("  TALLY_HOST    - Replica host (default: 127.0.0.1, or host in ~/.tallyrc)");
    eprintln!("  TALLY_PORT    - Replica port (default: 8080, or port in ~/.tallyrc)");
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn usage_error(message: &str) -> ! {
    eprintln!("Error: {}", message);
    print_usage();
    std::process::exit(1);
}

fn content_id_arg(args: &[String], command: &str) -> u64 {
    let raw = args
        .get(2)
        .unwrap_or_else(|| usage_error(&format!("{} requires <content_id>", command)));
    raw.parse()
        .unwrap_or_else(|_| fail(&format!("content_id must be a non-negative number, got '{}'", raw)))
}

/// Decode a JSON body, exiting with the server's error on a non-2xx status
fn expect_ok(response: Response) -> reqwest::Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body: Value = response.json().unwrap_or(Value::Null);
        let reason = body["error"].as_str().unwrap_or("request failed");
        fail(&format!("{} ({})", reason, status));
    }
    response.json()
}

fn print_json(body: &Value) {
    match serde_json::to_string_pretty(body) {
        Ok(pretty) => println!("{}", pretty),
        Err(_) => println!("{}", body),
    }
}

fn print_counters(body: &Value) {
    println!(
        "content {} on {}: {} total views",
        body["videoId"], body["currentReplica"].as_str().unwrap_or("?"), body["totalViews"]
    );
    if let Some(counters) = body["countersPerReplica"].as_array() {
        for counter in counters {
            println!(
                "  {:<20} {:>10}   (updated {} ms)",
                counter["replicaId"].as_str().unwrap_or("?"),
                counter["viewCount"],
                counter["lastUpdated"]
            );
        }
    }
}

fn main() -> reqwest::Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let command = args[1].as_str();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: ignoring unreadable ~/.tallyrc: {}", e);
        Config::default()
    });

    if command == COMMAND_CONNECT {
        if args.len() < 4 {
            usage_error("connect requires <host> <port>");
        }
        let port: u16 = args[3]
            .parse()
            .unwrap_or_else(|_| fail(&format!("Invalid port number '{}'", args[3])));
        let saved = Config { host: Some(args[2].clone()), port: Some(port) };
        if let Err(e) = saved.save() {
            fail(&format!("could not write ~/.tallyrc: {}", e));
        }
        println!("OK default replica is now {}:{}", args[2], port);
        return Ok(());
    }

    let (host, port) = config
        .resolve(env::var("TALLY_HOST").ok(), env::var("TALLY_PORT").ok())
        .unwrap_or_else(|e| fail(&e));
    let base = format!("http://{}:{}", host, port);

    let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

    match command {
        COMMAND_VIEW => {
            let id = content_id_arg(&args, command);
            let body = expect_ok(client.post(format!("{}/api/posts/{}/view", base, id)).send()?)?;
            println!("OK VIEW {} ({} on {})", id, body["count"], body["replicaId"].as_str().unwrap_or("?"));
        }
        COMMAND_TOTAL => {
            let id = content_id_arg(&args, command);
            let body = expect_ok(client.get(format!("{}/api/posts/{}/views", base, id)).send()?)?;
            println!("{}", body["totalViews"]);
        }
        COMMAND_COUNTERS => {
            let id = content_id_arg(&args, command);
            let body = expect_ok(client.get(format!("{}/api/posts/{}/crdt-views", base, id)).send()?)?;
            print_counters(&body);
        }
        COMMAND_STATS => {
            let id = content_id_arg(&args, command);
            let body = expect_ok(client.get(format!("{}/api/posts/{}/view-statistics", base, id)).send()?)?;
            print_counters(&body);
        }
        COMMAND_SYNC => {
            if args.len() < 5 {
                usage_error("sync requires <content_id> <replica_id> <count>");
            }
            let id = content_id_arg(&args, command);
            let count: u64 = args[4]
                .parse()
                .unwrap_or_else(|_| fail("count must be a non-negative number"));
            let body = json!({
                "action": "View Count Sync",
                "sourceReplicaId": args[3],
                "videoId": id,
                "count": count,
            });
            print_json(&expect_ok(client.post(format!("{}/api/crdt/sync", base)).json(&body).send()?)?);
        }
        COMMAND_FORCE_SYNC => {
            let id = content_id_arg(&args, command);
            print_json(&expect_ok(client.post(format!("{}/api/crdt/force-sync/{}", base, id)).send()?)?);
        }
        COMMAND_METRICS => {
            let response = client.get(format!("{}/metrics", base)).send()?;
            print!("{}", response.text()?);
        }
        COMMAND_HEALTH => {
            print_json(&expect_ok(client.get(format!("{}/health", base)).send()?)?);
        }
        _ => {
            eprintln!("Error: unknown command '{}'", command);
            print_usage();
            std::process::exit(1);
        }
    }

    Ok(())
}
