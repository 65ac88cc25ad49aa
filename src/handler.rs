//! Discord message handling: decides whether to answer, keeps the typing
//! indicator alive while the reply is generated, sends it, then relays and
//! logs the message.

use crate::activity::ActivitySignal;
use crate::config::DISCORD_MESSAGE_LIMIT;
use crate::context::IncomingMessage;
use crate::db::{ChannelInfo, LogEntry};
use crate::models::{Author, ImageData, Reply, Role};
use crate::relay::RelayRecord;
use crate::typing::spawn_ticker;
use crate::{Data, Error};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use serenity::{ActivityType, CreateAttachment, CreateMessage};
use tracing::{debug, error, info, warn};

pub const FAILURE_REPLY: &str = "Sorry, I couldn't generate a response.";

pub async fn handle_message(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    data: &Data,
) -> Result<(), Error> {
    if msg.author.bot {
        data.relay.notify(relay_record(msg));
        data.chat_log
            .log(log_entry(ctx, msg, Role::Assistant, msg.content.clone(), Vec::new()))
            .await;
        return Ok(());
    }

    if !should_reply(msg, data.bot_id) {
        return Ok(());
    }

    info!(
        "Handling message from {} in channel {}",
        msg.author.name, msg.channel_id
    );
    data.relay.notify(relay_record(msg));

    let http = ctx.http.clone();
    let channel_id = msg.channel_id;
    let typing = spawn_ticker(data.config.typing_interval, move || {
        let http = http.clone();
        async move {
            if let Err(e) = channel_id.broadcast_typing(&http).await {
                debug!("Failed to send typing indicator: {}", e);
            }
        }
    });

    let content = strip_bot_mentions(&msg.content, data.bot_id);
    let images = download_images(&data.http_client, msg).await;
    let incoming = IncomingMessage {
        author: author_of(&msg.author),
        channel_id: msg.channel_id.to_string(),
        content: content.clone(),
        images: images.clone(),
        activities: collect_activities(ctx, msg.author.id),
    };

    let response = data
        .responder
        .generate_response(&incoming, &data.character)
        .await;

    if let Err(e) = send_reply(ctx, msg, &response.reply).await {
        error!("Failed to handle message: {}", e);
        let fallback = CreateMessage::new().content(FAILURE_REPLY);
        let fallback = if msg.guild_id.is_some() {
            fallback.reference_message(msg)
        } else {
            fallback
        };
        if let Err(e) = msg.channel_id.send_message(&ctx.http, fallback).await {
            error!("Failed to send failure notice: {}", e);
        }
    }
    typing.stop();

    data.chat_log
        .log(log_entry(ctx, msg, Role::User, content, images))
        .await;
    Ok(())
}

/// Mentioned, messaged directly, or replied to.
fn should_reply(msg: &serenity::Message, bot_id: u64) -> bool {
    let is_dm = msg.guild_id.is_none();
    let replies_to_bot = msg
        .referenced_message
        .as_deref()
        .is_some_and(|referenced| referenced.author.id.get() == bot_id);
    is_dm || replies_to_bot || msg.mentions_user_id(serenity::UserId::new(bot_id))
}

pub fn strip_bot_mentions(input: &str, bot_id: u64) -> String {
    let mention = format!("<@{}>", bot_id);
    let mention_nick = format!("<@!{}>", bot_id);

    input
        .replace(&mention, "")
        .replace(&mention_nick, "")
        .trim()
        .to_string()
}

async fn send_reply(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    reply: &Reply,
) -> Result<(), Error> {
    if reply.text.trim().is_empty() && reply.images.is_empty() {
        warn!("Response is empty");
        return Ok(());
    }

    let mut chunks = split_message(&reply.text, DISCORD_MESSAGE_LIMIT).into_iter();
    let mut first = CreateMessage::new().add_files(
        reply
            .images
            .iter()
            .enumerate()
            .map(|(index, image)| {
                CreateAttachment::bytes(image.clone(), format!("image_{}.png", index + 1))
            })
            .collect::<Vec<_>>(),
    );
    if let Some(text) = chunks.next() {
        first = first.content(text);
    }
    if msg.guild_id.is_some() {
        first = first.reference_message(msg);
    }
    msg.channel_id.send_message(&ctx.http, first).await?;

    for text in chunks {
        msg.channel_id
            .send_message(&ctx.http, CreateMessage::new().content(text))
            .await?;
    }
    Ok(())
}

/// Splits text into pieces Discord accepts, preferring line breaks.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.split_inclusive('\n') {
        if current.chars().count() + line.chars().count() > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if line.chars().count() > limit {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
        } else {
            current.push_str(line);
        }
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

async fn download_images(http: &reqwest::Client, msg: &serenity::Message) -> Vec<ImageData> {
    let mut images = Vec::new();
    for attachment in &msg.attachments {
        let Some(mime_type) = attachment
            .content_type
            .as_deref()
            .filter(|mime| mime.starts_with("image/"))
        else {
            continue;
        };

        match fetch_bytes(http, &attachment.url).await {
            Ok(bytes) => images.push(ImageData {
                mime_type: mime_type.to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            }),
            Err(e) => warn!("Error converting image to Base64: {}", e),
        }
    }
    images
}

async fn fetch_bytes(http: &reqwest::Client, url: &str) -> reqwest::Result<Vec<u8>> {
    let response = http.get(url).send().await?.error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}

/// Activities from the first guild where the user has a non-empty presence.
fn collect_activities(ctx: &serenity::Context, user_id: serenity::UserId) -> Vec<ActivitySignal> {
    for guild_id in ctx.cache.guilds() {
        let Some(guild) = ctx.cache.guild(guild_id) else {
            continue;
        };
        if let Some(presence) = guild.presences.get(&user_id) {
            if !presence.activities.is_empty() {
                return presence.activities.iter().map(to_signal).collect();
            }
        }
    }
    Vec::new()
}

fn to_signal(activity: &serenity::Activity) -> ActivitySignal {
    let name = activity.name.clone();
    match activity.kind {
        ActivityType::Playing => ActivitySignal::Playing(name),
        ActivityType::Streaming => ActivitySignal::Streaming(name),
        ActivityType::Listening => ActivitySignal::Listening {
            name,
            details: activity.details.clone(),
            state: activity.state.clone(),
        },
        ActivityType::Watching => ActivitySignal::Watching(name),
        _ => ActivitySignal::Other(name),
    }
}

fn author_of(user: &serenity::User) -> Author {
    Author {
        id: user.id.to_string(),
        username: user.name.clone(),
        display_name: user.display_name().to_string(),
    }
}

fn timestamp_of(msg: &serenity::Message) -> DateTime<Utc> {
    DateTime::from_timestamp(msg.timestamp.unix_timestamp(), 0).unwrap_or_else(Utc::now)
}

fn relay_record(msg: &serenity::Message) -> RelayRecord {
    RelayRecord {
        user_id: msg.author.id.to_string(),
        channel_id: msg.channel_id.to_string(),
        username: msg.author.name.clone(),
        display_name: msg.author.display_name().to_string(),
        content: msg.content.clone(),
        timestamp: timestamp_of(msg),
    }
}

fn channel_info(ctx: &serenity::Context, msg: &serenity::Message) -> ChannelInfo {
    match msg.guild_id {
        Some(guild_id) => {
            let (name, server_name) =
                guild_names(ctx.cache.guild(guild_id).as_deref(), guild_id, msg.channel_id);
            ChannelInfo {
                id: msg.channel_id.to_string(),
                name,
                is_dm: false,
                server: Some((guild_id.to_string(), server_name)),
            }
        }
        None => ChannelInfo {
            id: msg.channel_id.to_string(),
            name: format!("DM with {}", msg.author.name),
            is_dm: true,
            server: None,
        },
    }
}

/// Channel and server names from the cached guild, falling back to ids.
fn guild_names(
    guild: Option<&serenity::Guild>,
    guild_id: serenity::GuildId,
    channel_id: serenity::ChannelId,
) -> (String, String) {
    match guild {
        Some(guild) => (
            guild
                .channels
                .get(&channel_id)
                .map(|channel| channel.name.clone())
                .unwrap_or_else(|| channel_id.to_string()),
            guild.name.clone(),
        ),
        None => (channel_id.to_string(), guild_id.to_string()),
    }
}

fn log_entry(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    role: Role,
    content: String,
    attachments: Vec<ImageData>,
) -> LogEntry {
    LogEntry {
        message_id: msg.id.to_string(),
        author: author_of(&msg.author),
        role,
        channel: channel_info(ctx, msg),
        content,
        timestamp: timestamp_of(msg),
        attachments,
    }
}
