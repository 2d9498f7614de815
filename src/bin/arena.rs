use chess_arena_engine::{
    AgentProfile, ArenaConfig, FirstCandidatePolicy, GreedyOraclePolicy, MoveOracle, MovePolicy,
    OpeningBook, Orchestrator, Personality, RandomPolicy, SearchConfig, SearchOracle,
    SyzygyTablebase,
};
use chrono::Utc;
use clap::{Arg, Command};
use std::error::Error;
use std::str::FromStr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let matches = Command::new("Chess Arena")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Agent-vs-agent chess with tiered candidate resolution")
        .arg(
            Arg::new("white_name")
                .long("white-name")
                .value_name("NAME")
                .help("White agent name")
                .default_value("alpha"),
        )
        .arg(
            Arg::new("black_name")
                .long("black-name")
                .value_name("NAME")
                .help("Black agent name")
                .default_value("beta"),
        )
        .arg(
            Arg::new("white_personality")
                .long("white-personality")
                .value_name("STYLE")
                .help("Candidate-ranking personality for White")
                .value_parser(["aggressive", "defensive", "balanced", "tactical", "positional"])
                .default_value("balanced"),
        )
        .arg(
            Arg::new("black_personality")
                .long("black-personality")
                .value_name("STYLE")
                .help("Candidate-ranking personality for Black")
                .value_parser(["aggressive", "defensive", "balanced", "tactical", "positional"])
                .default_value("balanced"),
        )
        .arg(
            Arg::new("white_policy")
                .long("white-policy")
                .value_name("POLICY")
                .help("How White picks from the menu")
                .value_parser(["menu", "random", "greedy"])
                .default_value("menu"),
        )
        .arg(
            Arg::new("black_policy")
                .long("black-policy")
                .value_name("POLICY")
                .help("How Black picks from the menu")
                .value_parser(["menu", "random", "greedy"])
                .default_value("menu"),
        )
        .arg(
            Arg::new("max_plies")
                .long("max-plies")
                .value_name("N")
                .help("Adjudicate a draw after this many plies")
                .value_parser(clap::value_parser!(u32).range(2..=4096))
                .default_value("512"),
        )
        .arg(
            Arg::new("depth")
                .long("depth")
                .value_name("PLIES")
                .help("Oracle search depth")
                .value_parser(clap::value_parser!(u32).range(1..=8))
                .default_value("3"),
        )
        .arg(
            Arg::new("book")
                .long("book")
                .value_name("FILE")
                .help("Opening book JSON to load on top of the built-in lines"),
        )
        .arg(
            Arg::new("tablebase")
                .long("tablebase")
                .value_name("DIR")
                .help("Syzygy tablebase directory"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("SEED")
                .help("Seed for random policies")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .help("Reject legal moves outside the candidate menu")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print the final summary as JSON")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("events")
                .long("events")
                .help("Print the event log as JSON lines")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    println!("Chess Arena Engine");
    println!("==================");

    let white_name = matches.get_one::<String>("white_name").unwrap().clone();
    let black_name = matches.get_one::<String>("black_name").unwrap().clone();
    let white_personality =
        Personality::from_str(matches.get_one::<String>("white_personality").unwrap())?;
    let black_personality =
        Personality::from_str(matches.get_one::<String>("black_personality").unwrap())?;
    let white_kind = matches.get_one::<String>("white_policy").unwrap().clone();
    let black_kind = matches.get_one::<String>("black_policy").unwrap().clone();
    let max_plies = *matches.get_one::<u32>("max_plies").unwrap();
    let depth = *matches.get_one::<u32>("depth").unwrap();
    let seed = matches.get_one::<u64>("seed").copied();
    let strict = matches.get_flag("strict");

    let search = SearchConfig {
        max_depth: depth,
        ..SearchConfig::fast()
    };
    let oracle = Arc::new(SearchOracle::new(search));

    let mut book = OpeningBook::with_standard_openings();
    if let Some(path) = matches.get_one::<String>("book") {
        let loaded = book.load_from_file(path)?;
        println!("Loaded {loaded} extra book positions from {path}");
    }

    let config = ArenaConfig {
        max_plies,
        ..ArenaConfig::default()
    };
    let mut orchestrator = Orchestrator::new(config)?
        .with_book(Arc::new(book))
        .with_oracle(Arc::clone(&oracle) as Arc<dyn MoveOracle>);

    if let Some(dir) = matches.get_one::<String>("tablebase") {
        match SyzygyTablebase::with_directory(dir) {
            Ok(tablebase) if tablebase.is_available() => {
                println!("Tablebase loaded from {dir}");
                orchestrator = orchestrator.with_tablebase(Arc::new(tablebase));
            }
            Ok(_) => println!("No tablebase files in {dir}, continuing without"),
            Err(e) => println!("Tablebase unavailable ({e}), continuing without"),
        }
    }

    let white_policy = build_policy(&white_kind, seed, &oracle);
    let black_policy = build_policy(&black_kind, seed.map(|s| s.wrapping_add(1)), &oracle);

    println!("White: {white_name} ({white_personality}, {white_kind} policy)");
    println!("Black: {black_name} ({black_personality}, {black_kind} policy)");

    let white_profile = AgentProfile::new(white_name.as_str())
        .with_personality(white_personality)
        .with_strict_candidates(strict);
    let black_profile = AgentProfile::new(black_name.as_str())
        .with_personality(black_personality)
        .with_strict_candidates(strict);

    let game_id = format!("arena-{}", Utc::now().format("%Y%m%d-%H%M%S"));
    let session = orchestrator.create_game(&game_id, white_profile, black_profile)?;

    println!("\nPlaying {game_id}...");
    let summary = orchestrator
        .run_game(&session, white_policy.as_ref(), black_policy.as_ref())
        .await?;

    println!("\nResult: {} in {} plies", summary.result, summary.total_plies);
    if let Some(reason) = summary.end_reason {
        println!("End reason: {reason:?}");
    }
    println!("\n{}", summary.movetext);

    {
        let guard = session.lock().await;
        if guard.events().commentary().next().is_some() {
            println!("\nCommentary");
            println!("----------");
            for remark in guard.events().commentary() {
                println!("  [{}] {}", remark.trigger, remark.text);
            }
        }
        if matches.get_flag("events") {
            println!("\n{}", guard.events().to_json_lines()?);
        }
    }

    println!("\nAgent stats");
    println!("-----------");
    for name in [white_name.as_str(), black_name.as_str()] {
        if let Some(stats) = orchestrator.agent_stats(name) {
            println!(
                "{}: {}W/{}L/{}D, avg cp loss {:.0}, accuracy {:.0}%, {} illegal, {} timeouts",
                name,
                stats.games_won,
                stats.games_lost,
                stats.games_drawn,
                stats.average_centipawn_loss,
                stats.tactical_accuracy,
                stats.illegal_moves,
                stats.timeouts
            );
        }
    }

    if matches.get_flag("json") {
        println!("\n{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}

fn build_policy(kind: &str, seed: Option<u64>, oracle: &Arc<SearchOracle>) -> Box<dyn MovePolicy> {
    match kind {
        "random" => match seed {
            Some(seed) => Box::new(RandomPolicy::seeded(seed)),
            None => Box::new(RandomPolicy::new()),
        },
        "greedy" => Box::new(GreedyOraclePolicy::new(
            Arc::clone(oracle) as Arc<dyn MoveOracle>
        )),
        _ => Box::new(FirstCandidatePolicy),
    }
}
