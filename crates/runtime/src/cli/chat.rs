//! `helmsman chat`: one-shot message or interactive REPL.

use std::sync::Arc;

use helm_domain::config::Settings;
use helm_domain::Channel;

use crate::bootstrap;

pub async fn run(
    settings: Arc<Settings>,
    message: Option<String>,
    session: Option<String>,
) -> anyhow::Result<()> {
    let state = bootstrap::build_app_state(settings).await?;
    state.scheduler.start();

    let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    match message {
        Some(message) => {
            let result = state
                .orchestrator
                .handle_request(&session_id, &message, Channel::Chat)
                .await;
            println!("{}", result.reply);
            eprintln!("(trace: {})", result.trace_id);
        }
        None => repl(&state, &session_id).await?,
    }

    state.scheduler.stop();
    Ok(())
}

async fn repl(state: &bootstrap::AppState, session_id: &str) -> anyhow::Result<()> {
    let mut editor = rustyline::DefaultEditor::new()?;

    eprintln!("Helmsman interactive chat");
    eprintln!("Session: {session_id}  |  Ctrl+D to exit");
    eprintln!();

    loop {
        match editor.readline("you> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                editor.add_history_entry(&line).ok();

                let result = state
                    .orchestrator
                    .handle_request(session_id, trimmed, Channel::Chat)
                    .await;
                println!("{}", result.reply);
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                eprintln!("(Ctrl+D to exit)");
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {e}");
                break;
            }
        }
    }
    Ok(())
}
