use catalogd::app::{App, Command, render_state};
use catalogd::config::CatalogConfig;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage: catalogd [--limit N] [--memory] [COMMAND]

Commands:
  list                              Load the newest page (default)
  newer                             Load items newer than the cached head
  older                             Grow the window and load older items
  delete <index>                    Delete the item at <index> in the window
  add <image-path> <text> <conf>    Upload a new item
  clear-remote                      Delete every item on the server

Options:
  --limit N    Window size (overrides CATALOG_FETCH_LIMIT)
  --memory     Use a throwaway in-memory store
  -h, --help   Show this help";

#[derive(Debug, Clone, PartialEq)]
struct Cli {
    command: Command,
    limit: Option<usize>,
    memory: bool,
    help: bool,
}

fn parse_cli_args<I>(args: I) -> anyhow::Result<Cli>
where
    I: IntoIterator<Item = String>,
{
    let mut limit = None;
    let mut memory = false;
    let mut help = false;
    let mut positional = Vec::new();

    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => help = true,
            "--memory" => memory = true,
            "--limit" => {
                let Some(value) = args.next() else {
                    anyhow::bail!("--limit needs a value");
                };
                let value: usize = value
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid --limit value: {value}"))?;
                if value == 0 {
                    anyhow::bail!("--limit must be positive");
                }
                limit = Some(value);
            }
            other if other.starts_with('-') => anyhow::bail!("unknown argument: {other}"),
            _ => positional.push(arg),
        }
    }

    let command = parse_command(&positional)?;
    Ok(Cli {
        command,
        limit,
        memory,
        help,
    })
}

fn parse_command(positional: &[String]) -> anyhow::Result<Command> {
    let Some((name, rest)) = positional.split_first() else {
        return Ok(Command::List);
    };
    let command = match (name.as_str(), rest) {
        ("list", []) => Command::List,
        ("newer", []) => Command::Newer,
        ("older", []) => Command::Older,
        ("clear-remote", []) => Command::ClearRemote,
        ("delete", [index]) => Command::Delete(
            index
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid index: {index}"))?,
        ),
        ("add", [image_path, text, confidence]) => Command::Add {
            image_path: image_path.into(),
            text: text.clone(),
            confidence: confidence
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid confidence: {confidence}"))?,
        },
        ("list" | "newer" | "older" | "clear-remote" | "delete" | "add", _) => {
            anyhow::bail!("wrong number of arguments for {name}")
        }
        (other, _) => anyhow::bail!("unknown command: {other}"),
    };
    Ok(command)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = parse_cli_args(std::env::args())?;
    if cli.help {
        println!("{USAGE}");
        return Ok(());
    }
    init_tracing();

    let mut config = CatalogConfig::from_env()?;
    if let Some(limit) = cli.limit {
        config.fetch_limit = limit;
    }
    let app = App::bootstrap(config, cli.memory).await?;
    let outcome = app.execute(cli.command).await;
    if let Ok(state) = &outcome {
        print!("{}", render_state(state));
    }
    app.shutdown().await;
    outcome.map(|_| ())
}
