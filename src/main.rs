use anyhow::Result;
use clap::Parser;
use litmesh::actors::messages::{AgentName, Message, MessageContent, RequestId};
use litmesh::cli::{Cli, Commands};
use litmesh::search::catalog::load_catalog;
use litmesh::search::{DocumentQuery, ResultConfig};
use litmesh::transport::GatedClient;
use litmesh::{utils, Node, Settings};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let mut settings = Settings::new()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, sources } => {
            if let Some(bind) = bind {
                settings.transport.bind_addr = bind;
            }
            if let Ok(secret) = Settings::directory_secret() {
                settings.directory.shared_secret = secret;
            }
            handle_serve(settings, sources).await
        }
        Commands::Query {
            text,
            addr,
            sources,
            deadline,
            partial,
            limit,
        } => {
            let mut query = DocumentQuery::new(text, sources)
                .with_partial_results(partial)
                .with_result_config(ResultConfig {
                    limit,
                    ..ResultConfig::default()
                });
            if let Some(deadline) = deadline {
                query = query.with_max_duration_ms(deadline);
            }
            handle_query(&settings, &addr, query).await
        }
        Commands::Status { agent, addr } => handle_status(&settings, &addr, agent).await,
        Commands::Kill {
            agent,
            addr,
            admin_secret,
        } => {
            let admin_secret = match admin_secret {
                Some(secret) => secret,
                None => Settings::directory_secret()?,
            };
            handle_kill(&settings, &addr, agent, admin_secret).await
        }
    }
}

fn client_name() -> AgentName {
    AgentName::new(format!("cli-{}", RequestId::generate()))
}

async fn handle_serve(settings: Settings, sources: Vec<(String, PathBuf)>) -> Result<()> {
    let mut catalogs = Vec::with_capacity(sources.len());
    for (name, path) in sources {
        catalogs.push((name, load_catalog(&path).await?));
    }

    let node = Node::start(&settings, catalogs).await?;
    utils::print_success(&format!("Listening on {}", node.local_addr()));
    utils::print_info("Press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    utils::print_info("Shutting down...");
    node.shutdown().await
}

async fn handle_query(settings: &Settings, addr: &str, query: DocumentQuery) -> Result<()> {
    let mut client = GatedClient::connect(addr, settings.transport.max_chunk_bytes).await?;
    let me = client_name();
    let coordinator = AgentName::new(settings.search.coordinator_name.clone());
    let request_id = RequestId::generate();
    let partial = query.partial_results;

    utils::print_header(&format!("Searching '{}' in {}", query.text, query.sources.join(", ")));
    client
        .send_message(&Message::new(
            me.clone(),
            coordinator.clone(),
            request_id.clone(),
            MessageContent::DocumentQueryAsk { query },
        ))
        .await?;

    let mut interrupted = false;
    loop {
        let message = tokio::select! {
            message = client.recv_message() => message?,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                let content = if partial {
                    utils::print_warning("Asking for the results gathered so far...");
                    MessageContent::ShowResultsNowNotify
                } else {
                    utils::print_warning("Cancelling query");
                    MessageContent::CancelRequestNotify
                };
                client
                    .send_message(&Message::new(me.clone(), coordinator.clone(), request_id.clone(), content))
                    .await?;
                if !partial {
                    break;
                }
                continue;
            }
        };

        if message.request_id != request_id {
            continue;
        }
        match message.content {
            MessageContent::DocumentQueryInfoNotify {
                source,
                total,
                from_cache,
            } => utils::print_progress(&source, total, from_cache),
            MessageContent::DocumentQueryTell { result } => {
                utils::print_result(&result);
                break;
            }
            MessageContent::ErrorTell { reason } => {
                utils::print_error(&reason);
                break;
            }
            other => tracing::debug!("Ignoring {:?}", other.kind()),
        }
    }

    client.close().await?;
    Ok(())
}

async fn handle_status(settings: &Settings, addr: &str, agent: String) -> Result<()> {
    let mut client = GatedClient::connect(addr, settings.transport.max_chunk_bytes).await?;
    let me = client_name();
    let within = settings.agent.ask_timeout();

    let status = client
        .request(
            &Message::new(me.clone(), agent.as_str(), RequestId::generate(), MessageContent::StatusAsk),
            within,
        )
        .await?;
    let handlers = client
        .request(
            &Message::new(me, agent.as_str(), RequestId::generate(), MessageContent::RequestMapAsk),
            within,
        )
        .await?;

    match (status.content, handlers.content) {
        (MessageContent::StatusTell { status }, MessageContent::RequestMapTell { handlers }) => {
            utils::print_status(&status, &handlers);
        }
        _ => utils::print_error(&format!("'{}' sent an unexpected reply", agent)),
    }

    client.close().await?;
    Ok(())
}

async fn handle_kill(settings: &Settings, addr: &str, agent: String, admin_secret: String) -> Result<()> {
    let mut client = GatedClient::connect(addr, settings.transport.max_chunk_bytes).await?;
    let directory = AgentName::new(settings.directory.name.clone());

    let reply = client
        .request(
            &Message::new(
                client_name(),
                directory,
                RequestId::generate(),
                MessageContent::KillAgentAsk {
                    name: AgentName::new(agent.clone()),
                    admin_secret,
                },
            ),
            settings.agent.ask_timeout() * 2,
        )
        .await;

    match reply.map(|m| m.content) {
        Ok(MessageContent::KillTell { killed: true }) => {
            utils::print_success(&format!("'{}' stopped", agent))
        }
        Ok(_) => utils::print_error(&format!("'{}' is not registered or did not confirm", agent)),
        Err(e) => utils::print_error(&format!("No answer from the directory: {}", e)),
    }

    client.close().await?;
    Ok(())
}
