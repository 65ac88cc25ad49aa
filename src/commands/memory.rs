use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum ClearTarget {
    #[name = "profile"]
    Profile,
    #[name = "history"]
    History,
}

/// Clear what the bot remembers about you
#[poise::command(slash_command)]
pub async fn clear(
    ctx: Context<'_>,
    #[description = "What to clear"] target: ClearTarget,
) -> Result<(), Error> {
    let user = ctx.author();
    let user_id = user.id.to_string();
    let data = ctx.data();

    let reply = match target {
        ClearTarget::Profile => {
            data.updater.forget_user(&user_id).await;
            format!("Profile cleared for **{}**.", user.name)
        }
        ClearTarget::History => {
            data.store.clear_history(&user_id).await;
            format!("Chat history cleared for **{}**.", user.name)
        }
    };

    info!("Cleared {:?} for user {}", target, user_id);
    ctx.say(reply).await?;
    Ok(())
}

/// Show what the bot has learned about you
#[poise::command(slash_command)]
pub async fn profile(ctx: Context<'_>) -> Result<(), Error> {
    let user = ctx.author();
    let profile = ctx.data().store.profile(&user.id.to_string()).await;

    let summary = if profile.summary.trim().is_empty() {
        "Nothing yet. Keep chatting!".to_string()
    } else {
        profile.summary.clone()
    };
    let facts = if profile.facts.is_empty() {
        "None".to_string()
    } else {
        profile
            .facts
            .iter()
            .map(|fact| format!("- {}", fact))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let embed = serenity::CreateEmbed::new()
        .title(format!("What I know about {}", user.name))
        .description(summary)
        .field("Personality", profile.personality.clone(), true)
        .field("Facts", facts, false)
        .color(0x5865F2);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}
