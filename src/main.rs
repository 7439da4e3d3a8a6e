//! LED Duel command line
//!
//! ## Usage
//!
//! ```bash
//! # Stakes for a 10-step sequence at difficulty 3
//! led-duel points --length 10 --difficulty 3
//!
//! # Create an account
//! led-duel register --email ada@example.com --password secret1 --pseudonyme ace
//!
//! # Send, accept and settle a challenge
//! led-duel challenge create --email ada@example.com --password secret1 --to <user-id> --sequence 1231231 --difficulty 4
//! led-duel challenge accept --email bob@example.com --password secret2 --index 0
//! led-duel challenge complete --recipient <user-id> --id <challenge-id> --steps 6 --total 7
//!
//! # Leaderboard and creatures
//! led-duel leaderboard --limit 10
//! led-duel deck capture --owner <user-id> --species 1 --caught
//! led-duel deck train --owner <user-id> --species 1 --experience 80
//!
//! # Trade creatures between players
//! led-duel deck export --owner <user-id> --species 1 --species 4 --output trade.json
//! led-duel deck import --owner <other-user-id> --input trade.json
//! ```

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use led_duel::auth::{AuthProvider, RegisterRequest, Session};
use led_duel::config::{Backend, Config};
use led_duel::model::{ChallengeId, DeckEntry, SpeciesId, UserId};
use led_duel::scoring;
use led_duel::services::{spawn_listener, DeviceReport, LoggingEventListener, Services};

#[derive(Parser, Debug)]
#[command(name = "led-duel")]
#[command(about = "Challenge and creature engine for the LED memory-game device")]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "LED_DUEL_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "LED_DUEL_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Storage backend (memory, sled)
    #[arg(long, env = "LED_DUEL_BACKEND")]
    backend: Option<Backend>,

    /// Species catalog file
    #[arg(long, env = "LED_DUEL_CATALOG")]
    catalog: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the stakes of a sequence, and the settlement for a result
    Points {
        #[arg(short, long)]
        length: usize,
        #[arg(short, long, default_value = "5")]
        difficulty: u8,
        /// Steps reproduced; prints the settlement instead of the stakes
        #[arg(short, long)]
        steps: Option<u32>,
    },

    /// Create an account and its profile
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "LED_DUEL_PASSWORD")]
        password: String,
        #[arg(long)]
        pseudonyme: String,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
    },

    /// Challenge operations
    #[command(subcommand)]
    Challenge(ChallengeCommands),

    /// Show the top players
    Leaderboard {
        #[arg(short, long)]
        limit: Option<usize>,
        /// Also print this player's rank
        #[arg(long)]
        user: Option<String>,
    },

    /// Creature collection
    #[command(subcommand)]
    Deck(DeckCommands),
}

#[derive(Debug, Args)]
struct Login {
    #[arg(long)]
    email: String,
    #[arg(long, env = "LED_DUEL_PASSWORD")]
    password: String,
}

#[derive(Debug, Subcommand)]
enum ChallengeCommands {
    /// Send a challenge to another player
    Create {
        #[command(flatten)]
        login: Login,
        /// Recipient user id
        #[arg(long)]
        to: String,
        /// LED sequence, digits 1 (red), 2 (green), 3 (yellow)
        #[arg(long)]
        sequence: String,
        #[arg(long, default_value = "5")]
        difficulty: u8,
    },

    /// Accept a pending challenge by id or by position in the pending list
    Accept {
        #[command(flatten)]
        login: Login,
        #[arg(long, conflicts_with = "index")]
        id: Option<String>,
        #[arg(long)]
        index: Option<usize>,
    },

    /// Settle an accepted challenge with the device's result
    Complete {
        #[arg(long)]
        recipient: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        steps: u32,
        #[arg(long)]
        total: u32,
    },

    /// List a player's challenges
    List {
        #[arg(long)]
        user: String,
        /// all, pending, completed or queue (what the device may play)
        #[arg(long, default_value = "all")]
        status: String,
        /// Include challenger names and stakes
        #[arg(long)]
        enriched: bool,
    },
}

#[derive(Debug, Subcommand)]
enum DeckCommands {
    /// Record a capture attempt
    Capture {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        species: u32,
        /// The attempt succeeded
        #[arg(long)]
        caught: bool,
    },

    /// Give experience to a collected creature
    Train {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        species: u32,
        #[arg(long)]
        experience: u64,
    },

    /// List a player's creatures
    List {
        #[arg(long)]
        owner: String,
    },

    /// Remove creatures from a deck and write them out as JSON
    Export {
        #[arg(long)]
        owner: String,
        #[arg(long, required = true)]
        species: Vec<u32>,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Add creatures from an export to a deck
    Import {
        #[arg(long)]
        owner: String,
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn login(services: &Services, login: &Login) -> anyhow::Result<Session> {
    services
        .auth
        .login(&login.email, &login.password)
        .await
        .map_err(|e| anyhow::anyhow!("login failed: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(dir) = cli.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(catalog) = cli.catalog {
        config.catalog_path = Some(catalog);
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("led_duel={}", config.log_level).parse()?),
        )
        .init();

    info!(
        backend = %config.backend,
        storage_dir = %config.storage_dir.display(),
        "Starting led-duel"
    );

    if config.backend == Backend::Sled {
        tokio::fs::create_dir_all(&config.storage_dir).await?;
    }

    let services = Services::open(&config).await?;
    let audit = spawn_listener(&services.events, Arc::new(LoggingEventListener));

    match cli.command {
        Command::Points {
            length,
            difficulty,
            steps,
        } => {
            let stakes = services.challenges.preview(length, difficulty)?;
            match steps {
                Some(steps) => {
                    if steps as usize > length {
                        bail!("steps ({steps}) exceed the sequence length ({length})");
                    }
                    print_json(&scoring::final_points(length, difficulty, steps, length as u32))?
                }
                None => print_json(&stakes.for_both_sides())?,
            }
        }

        Command::Register {
            email,
            password,
            pseudonyme,
            first_name,
            last_name,
        } => {
            let session = services
                .auth
                .register(RegisterRequest {
                    email,
                    password,
                    first_name,
                    last_name,
                    pseudonyme,
                })
                .await
                .map_err(|e| anyhow::anyhow!("registration failed: {e}"))?;
            print_json(&session)?;
        }

        Command::Challenge(command) => match command {
            ChallengeCommands::Create {
                login: credentials,
                to,
                sequence,
                difficulty,
            } => {
                let session = login(&services, &credentials).await?;
                let challenge = services
                    .challenges
                    .create(&session, &UserId::from(to), &sequence, difficulty)
                    .await?;
                print_json(&challenge)?;
            }
            ChallengeCommands::Accept {
                login: credentials,
                id,
                index,
            } => {
                let session = login(&services, &credentials).await?;
                let accepted = match (id, index) {
                    (Some(id), _) => {
                        let id: ChallengeId = id.parse()?;
                        services.challenges.accept(&session, id).await?
                    }
                    (None, Some(index)) => {
                        services.challenges.accept_pending_at(&session, index).await?
                    }
                    (None, None) => bail!("either --id or --index is required"),
                };
                if !accepted {
                    bail!("no pending challenge matched");
                }
                println!("accepted");
            }
            ChallengeCommands::Complete {
                recipient,
                id,
                steps,
                total,
            } => {
                let id: ChallengeId = id.parse()?;
                let receipt = services
                    .challenges
                    .complete(
                        &UserId::from(recipient),
                        id,
                        DeviceReport {
                            steps_completed: steps,
                            total_steps: total,
                        },
                    )
                    .await?;
                print_json(&receipt)?;
            }
            ChallengeCommands::List {
                user,
                status,
                enriched,
            } => {
                let user = UserId::from(user);
                let challenges = &services.challenges;
                match (status.as_str(), enriched) {
                    ("pending", true) => print_json(&challenges.enriched_pending(&user).await?)?,
                    ("completed", true) => {
                        print_json(&challenges.enriched_completed(&user).await?)?
                    }
                    ("pending", false) => print_json(&challenges.pending(&user).await?)?,
                    ("completed", false) => print_json(&challenges.completed(&user).await?)?,
                    ("queue", _) => print_json(&challenges.device_queue(&user).await?)?,
                    ("all", _) => print_json(&challenges.challenges(&user).await?)?,
                    (other, _) => bail!("unknown status filter: {other}"),
                }
            }
        },

        Command::Leaderboard { limit, user } => {
            let board = services.users.leaderboard(limit).await?;
            for (position, profile) in board.iter().enumerate() {
                println!("{:>4}  {:<20} {:>8}", position + 1, profile.pseudonyme, profile.points);
            }
            if let Some(user) = user {
                match services.users.rank(&UserId::from(user.as_str())).await? {
                    Some(rank) => println!("{user} is ranked {rank}"),
                    None => println!("{user} is not ranked"),
                }
            }
        }

        Command::Deck(command) => match command {
            DeckCommands::Capture {
                owner,
                species,
                caught,
            } => {
                let outcome = services
                    .deck
                    .attempt_capture(&UserId::from(owner), SpeciesId(species), caught)
                    .await?;
                print_json(&outcome)?;
            }
            DeckCommands::Train {
                owner,
                species,
                experience,
            } => {
                let outcome = services
                    .deck
                    .add_experience(&UserId::from(owner), SpeciesId(species), experience)
                    .await?;
                print_json(&outcome)?;
            }
            DeckCommands::List { owner } => {
                print_json(&services.deck.deck(&UserId::from(owner)).await?)?;
            }
            DeckCommands::Export {
                owner,
                species,
                output,
            } => {
                let species: Vec<SpeciesId> = species.into_iter().map(SpeciesId).collect();
                let entries = services
                    .deck
                    .export_entries(&UserId::from(owner), &species)
                    .await?;
                match output {
                    Some(path) => {
                        tokio::fs::write(&path, serde_json::to_vec_pretty(&entries)?)
                            .await
                            .with_context(|| format!("writing {}", path.display()))?;
                        info!(count = entries.len(), path = %path.display(), "Export written");
                    }
                    None => print_json(&entries)?,
                }
            }
            DeckCommands::Import { owner, input } => {
                let bytes = tokio::fs::read(&input)
                    .await
                    .with_context(|| format!("reading {}", input.display()))?;
                let entries: Vec<DeckEntry> = serde_json::from_slice(&bytes)?;
                let outcome = services
                    .deck
                    .import_entries(&UserId::from(owner), entries)
                    .await?;
                print_json(&outcome)?;
            }
        },
    }

    services.store.flush().await?;

    // Closing the bus lets the audit listener drain and stop
    drop(services);
    audit.await?;

    Ok(())
}
