use logger::logger;
use server::server;

// jemalloc keeps fragmentation down under many small per-request allocations
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() {
    logger::setup_logging();

    let ascii_logo = r#"
   __        ____
  / /_____ _/ / /_  __
 / __/ __ `/ / / / / /
/ /_/ /_/ / / / /_/ /
\__/\__,_/_/_/\__, /
             /____/
-----------------------------------------------
Replicated view counters (G-Counter CRDT)
-----------------------------------------------
    "#;

    println!("{}", ascii_logo);

    let server = match server::Server::new() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to initialize replica: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        eprintln!("Replica error: {}", e);
        std::process::exit(1);
    }
}
