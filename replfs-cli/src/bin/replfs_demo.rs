//! End-to-end demo client: runs a handful of canned scenarios against a
//! running `replfsd` quorum (`spec.md` §8). Grounded on
//! `examples/original_source/test.c`'s scenario drivers.

use clap::Parser;

use replfs_client::ClientSession;

#[derive(Parser)]
#[command(name = "replfs-demo", about = "Runs canned scenarios against a ReplFS quorum")]
struct Args {
    #[arg(long, default_value_t = 44_018)]
    port: u16,

    #[arg(long, default_value_t = 0)]
    drop: u8,

    #[arg(long, default_value_t = 1)]
    num_servers: usize,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut client = match ClientSession::new(args.port, args.drop, args.num_servers) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("failed to initialize ReplFS session: {e}");
            std::process::exit(1);
        }
    };

    let scenarios: &[(&str, fn(&mut ClientSession) -> Result<(), String>)] = &[
        ("abort discards writes", abort_discards_writes),
        ("commit survives a later abort without truncation", dont_truncate),
        ("empty commit creates an empty file", empty_commit),
        ("open then abort leaves no file", open_then_abort),
        ("write budget is enforced", write_budget_enforced),
    ];

    let mut failures = 0;
    for (name, scenario) in scenarios {
        match scenario(&mut client) {
            Ok(()) => println!("ok   - {name}"),
            Err(reason) => {
                println!("FAIL - {name}: {reason}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
}

fn abort_discards_writes(client: &mut ClientSession) -> Result<(), String> {
    let file = client.open_file("hello.txt").map_err(|e| e.to_string())?;
    for i in 0..100 {
        let line = format!("{i}\n");
        client
            .write_block(file, line.as_bytes(), 0)
            .map_err(|e| e.to_string())?;
    }
    client.abort(file).map_err(|e| e.to_string())
}

fn dont_truncate(client: &mut ClientSession) -> Result<(), String> {
    let file = client.open_file("numbers.txt").map_err(|e| e.to_string())?;
    client
        .write_block(file, b"I'm so very happy", 17)
        .map_err(|e| e.to_string())?;
    client.commit(file).map_err(|e| e.to_string())?;

    client
        .write_block(file, b"I'm so very sad", 17)
        .map_err(|e| e.to_string())?;
    client.abort(file).map_err(|e| e.to_string())?;
    client.close_file(file).map_err(|e| e.to_string())
}

fn empty_commit(client: &mut ClientSession) -> Result<(), String> {
    let file = client
        .open_file("should_be_empty.txt")
        .map_err(|e| e.to_string())?;
    client.commit(file).map_err(|e| e.to_string())?;
    client.close_file(file).map_err(|e| e.to_string())
}

fn open_then_abort(client: &mut ClientSession) -> Result<(), String> {
    let file = client
        .open_file("should_not_exist.txt")
        .map_err(|e| e.to_string())?;
    client.abort(file).map_err(|e| e.to_string())
}

fn write_budget_enforced(client: &mut ClientSession) -> Result<(), String> {
    let file = client.open_file("budget.txt").map_err(|e| e.to_string())?;
    for _ in 0..127 {
        client
            .write_block(file, b"x", 0)
            .map_err(|e| e.to_string())?;
    }
    match client.write_block(file, b"x", 0) {
        Ok(_) => Err("128th write unexpectedly succeeded".to_string()),
        Err(_) => client.abort(file).map_err(|e| e.to_string()),
    }
}
