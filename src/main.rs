use kestrel_panel::cli::CliOverrides;
use kestrel_panel::demo;

fn main() {
    let cli = match CliOverrides::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("[cli] {err}");
            std::process::exit(2);
        }
    };
    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = cli.log_level() {
        logger.filter_level(level);
    }
    logger.format_timestamp(None).init();

    match demo::run(&cli) {
        Ok(report) => {
            for participant in &report.participants {
                println!("== {} ==", participant.id);
                for line in &participant.display {
                    println!("  {line}");
                }
                for line in &participant.scene {
                    println!("  {line}");
                }
            }
            println!("delivered {} messages; converged: {}", report.delivered, report.converged);
        }
        Err(err) => {
            eprintln!("Application error: {err:?}");
            std::process::exit(1);
        }
    }
}
