//! `branch-chat`: terminal client for branching conversations.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use tokio::runtime::Runtime;

use branch_chat::conversation::{ChatConfig, ConversationId, MessageId};
use branch_chat::start_branch_chat::{
    self, ChatApp, DEFAULT_USER, HELP, ReplCommand, USER_ENV, preview,
};

fn main() -> ExitCode {
    start_branch_chat::init_tracing();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<()> {
    let rt = Runtime::new().context("failed to create runtime")?;
    let config = ChatConfig::from_env();
    let user_name = std::env::var(USER_ENV).unwrap_or_else(|_| DEFAULT_USER.to_string());
    let mut app = rt
        .block_on(start_branch_chat::initialize(config, &user_name))
        .context("failed to start")?;

    println!("branch-chat as {} (/help for commands)", app.user.name);
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }

        let command = ReplCommand::parse(&line);
        if command == ReplCommand::Quit {
            return Ok(());
        }
        if let Err(err) = rt.block_on(handle(&mut app, command)) {
            println!("error: {err:#}");
        }
    }
}

async fn handle(app: &mut ChatApp, command: ReplCommand) -> Result<()> {
    match command {
        ReplCommand::Empty | ReplCommand::Quit => {}
        ReplCommand::Help => println!("{HELP}"),
        ReplCommand::Unknown(line) => println!("unknown command {line}; try /help"),
        ReplCommand::New => {
            let prompt = app.config.llm.system_prompt.clone();
            let id = app.turns.start(prompt.as_deref()).await?;
            println!("conversation {id}");
        }
        ReplCommand::List => {
            let records = app.backends.conversations.list_by_owner(app.user.id).await?;
            let active = app.turns.manager().active_conversation();
            for record in records {
                let marker = if Some(record.id) == active { '*' } else { ' ' };
                println!(
                    "{marker} {} {}",
                    record.id,
                    record.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        ReplCommand::Load(raw) => {
            let id: ConversationId = raw.parse().context("invalid conversation id")?;
            let manager = app.turns.manager_mut();
            manager.load_conversation(id).await?;
            // Continue from the most recently appended branch tip.
            let newest = manager.tree().and_then(|tree| {
                let tip = tree.leaves().into_iter().max()?;
                tree.message_id(tip)
            });
            if let Some(message_id) = newest {
                manager.select_node(message_id).await?;
            }
            print_tree(app).await?;
        }
        ReplCommand::Tree => print_tree(app).await?,
        ReplCommand::Select(raw) => {
            let id: MessageId = raw.parse().context("invalid message id")?;
            app.turns.manager_mut().select_node(id).await?;
            print_path(app).await?;
        }
        ReplCommand::Path => print_path(app).await?,
        ReplCommand::Regen => {
            let reply = app.turns.regenerate_selected().await?;
            println!("{}", reply.content);
        }
        ReplCommand::Send(text) => {
            if app.turns.manager().active_conversation().is_none() {
                let prompt = app.config.llm.system_prompt.clone();
                app.turns.start(prompt.as_deref()).await?;
            }
            let reply = app.turns.send(&text).await?;
            println!("{}", reply.content);
        }
    }
    Ok(())
}

async fn print_tree(app: &ChatApp) -> Result<()> {
    let manager = app.turns.manager();
    let Some(conversation) = manager.active_conversation() else {
        println!("no active conversation");
        return Ok(());
    };
    let Some(tree) = manager.tree() else {
        println!("conversation {conversation} is empty");
        return Ok(());
    };

    let labels: HashMap<MessageId, String> = app
        .backends
        .messages
        .list_by_conversation(conversation)
        .await?
        .into_iter()
        .map(|m| (m.id, format!("[{}] {}", m.role, preview(&m.content, 48))))
        .collect();
    print!(
        "{}",
        start_branch_chat::render_tree(tree, manager.selected_node(), &labels)
    );
    Ok(())
}

async fn print_path(app: &ChatApp) -> Result<()> {
    for message in app.turns.manager().selected_context().await? {
        println!("[{}] {}: {}", message.id, message.role, message.content);
    }
    Ok(())
}
