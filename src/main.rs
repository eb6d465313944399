use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use taskdeck::config::Config;
use taskdeck::tasks::TaskOp;
use taskdeck::Client;

#[derive(Parser)]
#[command(name = "taskdeck", about = "Command-line client for the task list API")]
struct Cli {
    /// Overrides TASKDECK_API_URL.
    #[arg(long)]
    api_url: Option<String>,
    /// Overrides TASKDECK_STATE_PATH.
    #[arg(long)]
    state: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Signup {
        email: String,
        password: String,
        #[arg(long)]
        name: Option<String>,
    },
    Login {
        email: String,
        password: String,
    },
    Logout,
    Whoami,
    #[command(subcommand)]
    Tasks(TaskCommand),
}

#[derive(Subcommand)]
enum TaskCommand {
    List,
    Add {
        #[arg(required = true)]
        title: Vec<String>,
    },
    Toggle {
        id: Uuid,
    },
    Rm {
        id: Uuid,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let client = match load_config(&cli).map(|config| Client::init(&config)) {
        Ok(Ok(client)) => client,
        Ok(Err(err)) => return fail(err),
        Err(err) => return fail(err),
    };

    let result = run(&client, cli.command).await;
    client.teardown();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => fail(message),
    }
}

fn load_config(cli: &Cli) -> Result<Config, taskdeck::error::ConfigError> {
    let mut config = Config::from_env()?;
    if let Some(url) = &cli.api_url {
        config = config.with_api_url(url)?;
    }
    if let Some(path) = &cli.state {
        config = config.with_state_path(path);
    }
    Ok(config)
}

fn fail(message: impl std::fmt::Display) -> ExitCode {
    eprintln!("error: {message}");
    ExitCode::FAILURE
}

async fn run(client: &Client, command: Command) -> Result<(), String> {
    match command {
        Command::Signup {
            email,
            password,
            name,
        } => {
            let user = client
                .session
                .sign_up(&email, &password, name.as_deref())
                .await
                .map_err(|err| err.to_string())?;
            println!("Signup successful for {}. Please log in.", user.email);
        }
        Command::Login { email, password } => {
            let session = client
                .session
                .sign_in(&email, &password)
                .await
                .map_err(|err| err.to_string())?;
            println!("Logged in as {}", session.user.email);
        }
        Command::Logout => {
            client.session.sign_out().await.map_err(|err| err.to_string())?;
            println!("Logged out");
        }
        Command::Whoami => match client.session.get_session() {
            Some(session) => println!(
                "{} ({})",
                session.user.name.as_deref().unwrap_or(&session.user.email),
                session.user.id
            ),
            None => println!("Not logged in"),
        },
        Command::Tasks(command) => run_tasks(client, command).await?,
    }
    Ok(())
}

async fn run_tasks(client: &Client, command: TaskCommand) -> Result<(), String> {
    let tasks = &client.tasks;
    match command {
        TaskCommand::List => {
            let list = tasks
                .list()
                .await
                .map_err(|err| TaskOp::Load.failure_message(&err))?;
            if list.is_empty() {
                println!("No tasks");
            }
            for task in list {
                let mark = if task.is_completed { 'x' } else { ' ' };
                println!("[{mark}] {} {}", task.id, task.title);
            }
        }
        TaskCommand::Add { title } => {
            let task = tasks
                .create(&title.join(" "))
                .await
                .map_err(|err| TaskOp::Create.failure_message(&err))?;
            println!("Created {}", task.id);
        }
        TaskCommand::Toggle { id } => {
            let task = tasks
                .get(id)
                .await
                .map_err(|err| TaskOp::Toggle.failure_message(&err))?;
            let task = tasks
                .toggle(&task)
                .await
                .map_err(|err| TaskOp::Toggle.failure_message(&err))?;
            let state = if task.is_completed { "done" } else { "open" };
            println!("{} is now {state}", task.id);
        }
        TaskCommand::Rm { id } => {
            tasks
                .delete(id)
                .await
                .map_err(|err| TaskOp::Delete.failure_message(&err))?;
            println!("Deleted {id}");
        }
    }
    Ok(())
}
