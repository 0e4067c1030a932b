use crate::config::Config;
use crate::conversation::ParticipantId;
use crate::message_store::MessageStore;
use crate::messenger::Messenger;
use crate::messenger_types::{format_local_time, FeedState};
use crate::profile_store::{ProfileStore, ProfileUpdate};
use colored::*;
use std::sync::Arc;

/// Run one CLI command against the local stores.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let Some(command) = config.command.first().cloned() else {
        print_usage();
        return Ok(());
    };

    std::fs::create_dir_all(&config.data_dir)?;
    let store = MessageStore::with_buffer(&config.data_dir, config.feed_buffer)?;
    let profiles = ProfileStore::new(&config.data_dir)?;
    let me = config.require_user()?.clone();
    let messenger = Messenger::new(Arc::new(store), me.clone()).with_profiles(profiles.clone());
    let args = &config.command[1..];

    match command.as_str() {
        "send" => {
            if args.len() < 2 {
                eprintln!("{}", "Usage: syncin send <user_id> <message>".yellow());
                return Ok(());
            }
            let to = ParticipantId::from(args[0].as_str());
            send_message(&messenger, &to, &args[1..].join(" ")).await?;
        }
        "history" => {
            let Some(peer) = args.first() else {
                eprintln!("{}", "Usage: syncin history <user_id>".yellow());
                return Ok(());
            };
            show_history(&messenger, &profiles, &ParticipantId::from(peer.as_str())).await?;
        }
        "chats" => {
            list_chats(&messenger).await?;
        }
        "profile" => {
            edit_profile(&profiles, &me, args)?;
        }
        _ => {
            eprintln!("{} Unknown command: {}", "✗".red().bold(), command.red());
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!("{}", "SyncIn chat".bright_cyan().bold());
    println!();
    println!("{}", "Usage:".bright_white().bold());
    println!("  {} --user <id> [--data-dir <path>] <command> [args]", "syncin".cyan());
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!("  {} <user_id> <message>   Send a message", "send".cyan());
    println!("  {} <user_id>          Show a conversation", "history".cyan());
    println!("  {}                    List conversations, newest first", "chats".cyan());
    println!(
        "  {} [field=value ...]   Show or edit your profile (name, email, bio, hobbies)",
        "profile".cyan()
    );
}

async fn send_message(messenger: &Messenger, to: &ParticipantId, text: &str) -> anyhow::Result<()> {
    let outcome = messenger.send(to, text).await?;
    println!(
        "{} Message sent! ID: {}",
        "✓".green().bold(),
        outcome.message.id.cyan()
    );
    if let Some(e) = outcome.summary_error {
        eprintln!("{} Chat list not updated: {}", "!".yellow().bold(), e);
    }
    Ok(())
}

async fn show_history(
    messenger: &Messenger,
    profiles: &ProfileStore,
    peer: &ParticipantId,
) -> anyhow::Result<()> {
    let mut feed = messenger.open_conversation(peer).await?;
    let view = feed
        .wait_for(|v| v.state == FeedState::Synced)
        .await
        .ok_or_else(|| anyhow::anyhow!("conversation feed closed before syncing"))?;
    feed.unsubscribe();

    let title = profiles.display_name(peer);
    println!("{}", format!("Chat with {}", title).bright_cyan().bold());
    println!("{}", "─".repeat(60).dimmed());
    if view.messages.is_empty() {
        println!("{}", "No messages yet".yellow());
    }
    for msg in &view.messages {
        let time = format_local_time(msg.sent_at).dimmed();
        if msg.is_from(messenger.me()) {
            println!("{:>50}  {}", msg.text.bright_blue(), time);
        } else {
            println!("{}  {}", msg.text.white(), time);
        }
    }
    Ok(())
}

async fn list_chats(messenger: &Messenger) -> anyhow::Result<()> {
    let chats = messenger.chat_list().await?;
    if chats.is_empty() {
        println!("{}", "No chats yet".yellow());
        return Ok(());
    }
    println!("{}", format!("Chats ({})", chats.len()).bright_cyan().bold());
    println!("{}", "─".repeat(60).dimmed());
    for chat in chats {
        println!(
            "  {:<20} {:<30} {}",
            chat.display_name.cyan(),
            chat.last_message_text,
            chat.time.dimmed()
        );
    }
    Ok(())
}

fn edit_profile(profiles: &ProfileStore, me: &ParticipantId, args: &[String]) -> anyhow::Result<()> {
    let mut update = ProfileUpdate::default();
    for arg in args {
        let Some((field, value)) = arg.split_once('=') else {
            anyhow::bail!("expected field=value, got {}", arg);
        };
        let value = Some(value.to_string());
        match field {
            "name" => update.name = value,
            "email" => update.email = value,
            "bio" => update.bio = value,
            "hobbies" => update.hobbies = value,
            other => anyhow::bail!("unknown profile field: {}", other),
        }
    }

    let profile = if update.is_empty() {
        profiles.get(me)?
    } else {
        Some(profiles.upsert(me, update)?)
    };

    match profile {
        Some(p) => {
            println!("{}", format!("Profile of {}", p.user_id).bright_cyan().bold());
            println!("  name:    {}", p.name);
            println!("  email:   {}", p.email);
            println!("  bio:     {}", p.bio);
            println!("  hobbies: {}", p.hobbies);
        }
        None => println!("{}", "Profile not set".yellow()),
    }
    Ok(())
}
