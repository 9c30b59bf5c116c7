//! Discord gateway runtime that relays triggered chat traffic to Gemini.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use lyre_ai::{
    ChatRequest, ChatResponse, LlmClient, LyreAiError, RequestTools, StreamDeltaHandler,
};
use lyre_core::current_unix_timestamp_ms;
use lyre_provider::GeminiKeyPool;
use lyre_session::{
    assemble_chat_request, ensure_cache, maybe_summarize, CachePolicy, MemoryPolicy, PrivateTurn,
    PromptSettings, SessionKey, SessionStore, SharedTurn, SummarizerConfig,
};
use serenity::async_trait;
use serenity::builder::{
    CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseFollowup, CreateInteractionResponseMessage, EditInteractionResponse,
    EditMessage, GetMessages,
};
use serenity::client::{Client, Context, EventHandler};
use serenity::http::Http;
use serenity::model::application::{
    Command, CommandInteraction, CommandOptionType, Interaction, ResolvedValue,
};
use serenity::model::channel::Message;
use serenity::model::gateway::{GatewayIntents, Ready};
use serenity::model::id::{ChannelId, MessageId};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

mod discord_helpers;
mod stream_flush;

use discord_helpers::{
    extract_triggered_prompt, render_user_facing_error, resolve_display_name, split_into_chunks,
    DISCORD_MESSAGE_LIMIT, EMPTY_REPLY_PLACEHOLDER, PENDING_REPLY_PLACEHOLDER,
};
use stream_flush::StreamFlushPolicy;

#[derive(Clone)]
/// Runtime configuration for the Discord relay loop.
pub struct DiscordRelayConfig {
    pub discord_token: String,
    pub pool: Arc<GeminiKeyPool>,
    pub store: Arc<dyn SessionStore>,
    pub model: String,
    pub persona: String,
    pub streaming: bool,
    pub stream_edit_interval_ms: u64,
    pub temperature: Option<f32>,
    pub tools: RequestTools,
    pub trigger_prefixes: Vec<String>,
    pub history_seed_limit: usize,
    pub memory_policy: MemoryPolicy,
    pub summarizer: SummarizerConfig,
    pub cache_policy: CachePolicy,
}

/// Connects to the Discord gateway and relays triggered chat traffic until
/// the connection ends.
pub async fn run_discord_relay(config: DiscordRelayConfig) -> Result<()> {
    let token = config.discord_token.clone();
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;
    let handler = RelayHandler::new(config);
    let mut client = Client::builder(&token, intents)
        .event_handler(handler)
        .await
        .context("failed to build the discord gateway client")?;
    client
        .start()
        .await
        .context("discord gateway loop ended with an error")?;
    Ok(())
}

/// Where the in-flight reply for an exchange lives: a plain channel message
/// we keep editing, or a deferred interaction response.
#[derive(Clone)]
enum ReplyHandle {
    ChannelMessage {
        http: Arc<Http>,
        channel_id: ChannelId,
        message_id: MessageId,
    },
    Interaction {
        http: Arc<Http>,
        command: CommandInteraction,
        ephemeral: bool,
    },
}

impl ReplyHandle {
    /// Replaces the in-flight reply content.
    async fn update(&self, content: &str) -> Result<(), serenity::Error> {
        match self {
            Self::ChannelMessage {
                http,
                channel_id,
                message_id,
            } => channel_id
                .edit_message(http, *message_id, EditMessage::new().content(content))
                .await
                .map(|_| ()),
            Self::Interaction { http, command, .. } => command
                .edit_response(http, EditInteractionResponse::new().content(content))
                .await
                .map(|_| ()),
        }
    }

    /// Emits an overflow chunk after the in-flight reply.
    async fn follow_up(&self, content: &str) -> Result<(), serenity::Error> {
        match self {
            Self::ChannelMessage {
                http, channel_id, ..
            } => channel_id.say(http, content).await.map(|_| ()),
            Self::Interaction {
                http,
                command,
                ephemeral,
            } => command
                .create_followup(
                    http,
                    CreateInteractionResponseFollowup::new()
                        .content(content)
                        .ephemeral(*ephemeral),
                )
                .await
                .map(|_| ()),
        }
    }
}

struct RelayHandler {
    config: DiscordRelayConfig,
    // Filled in from the ready event; the gateway cache feature is not
    // enabled, so self-identity is tracked here.
    bot_user_id: AtomicU64,
    bot_display_name: Mutex<String>,
}

impl RelayHandler {
    fn new(config: DiscordRelayConfig) -> Self {
        Self {
            config,
            bot_user_id: AtomicU64::new(0),
            bot_display_name: Mutex::new("assistant".to_string()),
        }
    }

    fn bot_display_name(&self) -> String {
        match self.bot_display_name.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_bot_display_name(&self, name: &str) {
        let mut guard = match self.bot_display_name.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = name.to_string();
    }

    async fn handle_chat_command(&self, ctx: &Context, command: &CommandInteraction) {
        let mut prompt = String::new();
        let mut private = false;
        for option in command.data.options() {
            match &option.value {
                ResolvedValue::String(value) if option.name == "prompt" => {
                    prompt = value.trim().to_string();
                }
                ResolvedValue::Boolean(value) if option.name == "private" => private = *value,
                _ => {}
            }
        }
        if prompt.is_empty() {
            let response = CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content("Give me a prompt to work with.")
                    .ephemeral(true),
            );
            if let Err(error) = command.create_response(&ctx.http, response).await {
                error!(error = %error, "failed to reject empty /chat prompt");
            }
            return;
        }

        let defer = CreateInteractionResponse::Defer(
            CreateInteractionResponseMessage::new().ephemeral(private),
        );
        if let Err(error) = command.create_response(&ctx.http, defer).await {
            error!(error = %error, "failed to defer /chat response");
            return;
        }

        let speaker = resolve_display_name(
            command
                .member
                .as_deref()
                .and_then(|member| member.nick.as_deref()),
            command.user.global_name.as_deref(),
            &command.user.name,
        );
        let key = SessionKey::new(
            command.channel_id.get().to_string(),
            command.user.id.get().to_string(),
        );
        self.seed_shared_history(ctx, command.channel_id).await;

        let reply = Arc::new(ReplyHandle::Interaction {
            http: ctx.http.clone(),
            command: command.clone(),
            ephemeral: private,
        });
        self.run_exchange(key, speaker, prompt, reply).await;
    }

    async fn handle_reset_command(&self, ctx: &Context, command: &CommandInteraction) {
        let key = SessionKey::new(
            command.channel_id.get().to_string(),
            command.user.id.get().to_string(),
        );
        self.config.store.clear_session(&key);
        info!(
            channel = key.channel_id.as_str(),
            user = key.user_id.as_str(),
            "session cleared by /reset"
        );
        let response = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content("Your conversation here has been forgotten.")
                .ephemeral(true),
        );
        if let Err(error) = command.create_response(&ctx.http, response).await {
            error!(error = %error, "failed to confirm /reset");
        }
    }

    /// Seeds the channel's shared window from recent history when it is
    /// empty, so a cold start still has ambient context to relay.
    async fn seed_shared_history(&self, ctx: &Context, channel_id: ChannelId) {
        if self.config.history_seed_limit == 0 {
            return;
        }
        let channel_key = channel_id.get().to_string();
        if !self.config.store.shared_window(&channel_key).is_empty() {
            return;
        }
        let limit = self.config.history_seed_limit.min(100) as u8;
        match channel_id
            .messages(&ctx.http, GetMessages::new().limit(limit))
            .await
        {
            Ok(mut history) => {
                // Discord returns newest first.
                history.reverse();
                let mut seeded = 0usize;
                for message in &history {
                    if message.author.bot || message.content.trim().is_empty() {
                        continue;
                    }
                    let speaker = resolve_display_name(
                        message
                            .member
                            .as_deref()
                            .and_then(|member| member.nick.as_deref()),
                        message.author.global_name.as_deref(),
                        &message.author.name,
                    );
                    self.config
                        .store
                        .record_shared_turn(&channel_key, SharedTurn::new(speaker, message.content.clone()));
                    seeded += 1;
                }
                debug!(
                    channel = channel_key.as_str(),
                    seeded, "seeded shared context from channel history"
                );
            }
            Err(error) => {
                warn!(
                    error = %error,
                    channel = channel_key.as_str(),
                    "failed to seed channel history, continuing with empty context"
                );
            }
        }
    }

    /// The exchange pipeline shared by the message and slash-command
    /// surfaces. Summarization and cache trouble never fail the exchange;
    /// generation failure is rendered back to the caller.
    async fn run_exchange(
        &self,
        key: SessionKey,
        speaker: String,
        prompt: String,
        reply: Arc<ReplyHandle>,
    ) {
        let config = &self.config;
        let store = config.store.as_ref();

        store.record_private_turn(&key, PrivateTurn::user(prompt.clone()));
        store.record_shared_turn(&key.channel_id, SharedTurn::new(speaker.clone(), prompt));

        maybe_summarize(
            config.pool.as_ref(),
            store,
            &key,
            &config.model,
            &config.memory_policy,
            &config.summarizer,
        )
        .await;
        let cached_content = ensure_cache(
            config.pool.as_ref(),
            store,
            &key,
            &config.model,
            &config.cache_policy,
        )
        .await;

        let settings = PromptSettings {
            model: config.model.clone(),
            persona: config.persona.clone(),
            tools: config.tools,
            temperature: config.temperature,
        };
        let request = assemble_chat_request(store, &key, &speaker, cached_content, &settings);

        let outcome = if config.streaming {
            self.generate_streaming(request, &reply).await
        } else {
            config
                .pool
                .call(|client| {
                    let request = request.clone();
                    async move { client.complete(request).await }
                })
                .await
        };

        match outcome {
            Ok(response) => {
                let text = if response.text.trim().is_empty() {
                    EMPTY_REPLY_PLACEHOLDER.to_string()
                } else {
                    response.text
                };
                store.record_private_turn(&key, PrivateTurn::assistant(text.clone()));
                store.record_shared_turn(
                    &key.channel_id,
                    SharedTurn::new(self.bot_display_name(), text.clone()),
                );
                info!(
                    channel = key.channel_id.as_str(),
                    user = key.user_id.as_str(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "exchange complete"
                );
                self.deliver_reply(&reply, &text).await;
            }
            Err(error) => {
                warn!(
                    channel = key.channel_id.as_str(),
                    user = key.user_id.as_str(),
                    error = %error,
                    "generation failed"
                );
                if let Err(edit_error) = reply.update(&render_user_facing_error(&error)).await {
                    error!(error = %edit_error, "failed to deliver error reply");
                }
            }
        }
    }

    /// Streams a generation through the pool while a timer task keeps the
    /// in-flight reply updated with throttled previews.
    async fn generate_streaming(
        &self,
        request: ChatRequest,
        reply: &Arc<ReplyHandle>,
    ) -> Result<ChatResponse, LyreAiError> {
        let accumulated = Arc::new(Mutex::new(String::new()));
        let editor = spawn_stream_editor(
            Arc::clone(reply),
            Arc::clone(&accumulated),
            self.config.stream_edit_interval_ms,
        );

        let result = self
            .config
            .pool
            .call(|client| {
                let request = request.clone();
                let accumulated = Arc::clone(&accumulated);
                async move {
                    // A retried attempt restarts its stream from scratch;
                    // deltas from the failed attempt must not survive into
                    // the preview.
                    reset_accumulated_text(&accumulated);
                    let sink = Arc::clone(&accumulated);
                    let on_delta: StreamDeltaHandler = Arc::new(move |delta: String| {
                        append_accumulated_text(&sink, &delta);
                    });
                    client.complete_with_stream(request, Some(on_delta)).await
                }
            })
            .await;

        editor.abort();
        let _ = editor.await;
        result
    }

    async fn deliver_reply(&self, reply: &ReplyHandle, text: &str) {
        let mut chunks = split_into_chunks(text, DISCORD_MESSAGE_LIMIT).into_iter();
        let Some(first) = chunks.next() else {
            return;
        };
        if let Err(error) = reply.update(&first).await {
            error!(error = %error, "failed to edit in-flight reply with final text");
            return;
        }
        for chunk in chunks {
            if let Err(error) = reply.follow_up(&chunk).await {
                error!(error = %error, "failed to send overflow chunk");
                return;
            }
        }
    }
}

#[async_trait]
impl EventHandler for RelayHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        self.bot_user_id.store(ready.user.id.get(), Ordering::SeqCst);
        self.set_bot_display_name(&ready.user.name);
        info!(user = %ready.user.name, "discord gateway session ready");

        for command in [chat_command(), reset_command()] {
            match Command::create_global_command(&ctx.http, command).await {
                Ok(registered) => {
                    info!(command = %registered.name, "registered global slash command");
                }
                Err(error) => {
                    error!(error = %error, "failed to register global slash command");
                }
            }
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let bot_user_id = self.bot_user_id.load(Ordering::SeqCst);
        let Some(prompt) =
            extract_triggered_prompt(&msg.content, &self.config.trigger_prefixes, bot_user_id)
        else {
            return;
        };

        let speaker = resolve_display_name(
            msg.member.as_deref().and_then(|member| member.nick.as_deref()),
            msg.author.global_name.as_deref(),
            &msg.author.name,
        );
        let key = SessionKey::new(
            msg.channel_id.get().to_string(),
            msg.author.id.get().to_string(),
        );

        let typing = msg.channel_id.start_typing(&ctx.http);
        self.seed_shared_history(&ctx, msg.channel_id).await;

        let placeholder = match msg.channel_id.say(&ctx.http, PENDING_REPLY_PLACEHOLDER).await {
            Ok(message) => message,
            Err(error) => {
                error!(
                    error = %error,
                    channel = msg.channel_id.get(),
                    "failed to post in-flight reply"
                );
                return;
            }
        };
        let reply = Arc::new(ReplyHandle::ChannelMessage {
            http: ctx.http.clone(),
            channel_id: msg.channel_id,
            message_id: placeholder.id,
        });

        self.run_exchange(key, speaker, prompt, reply).await;
        drop(typing);
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };
        match command.data.name.as_str() {
            "chat" => self.handle_chat_command(&ctx, &command).await,
            "reset" => self.handle_reset_command(&ctx, &command).await,
            other => warn!(command = other, "ignoring unknown slash command"),
        }
    }
}

fn chat_command() -> CreateCommand {
    CreateCommand::new("chat")
        .description("Ask the assistant a question in this channel")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "prompt", "What to ask")
                .required(true),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::Boolean,
            "private",
            "Show the reply only to you",
        ))
}

fn reset_command() -> CreateCommand {
    CreateCommand::new("reset").description("Forget your conversation in this channel")
}

fn spawn_stream_editor(
    reply: Arc<ReplyHandle>,
    accumulated: Arc<Mutex<String>>,
    interval_ms: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut policy = StreamFlushPolicy::new(interval_ms);
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let snapshot = snapshot_accumulated_text(&accumulated);
            if let Some(preview) = policy.observe(current_unix_timestamp_ms(), &snapshot) {
                if let Err(error) = reply.update(&preview).await {
                    debug!(error = %error, "in-flight preview edit failed");
                }
            }
        }
    })
}

fn reset_accumulated_text(buffer: &Mutex<String>) {
    match buffer.lock() {
        Ok(mut guard) => guard.clear(),
        Err(poisoned) => poisoned.into_inner().clear(),
    }
}

fn append_accumulated_text(buffer: &Mutex<String>, delta: &str) {
    match buffer.lock() {
        Ok(mut guard) => guard.push_str(delta),
        Err(poisoned) => poisoned.into_inner().push_str(delta),
    }
}

fn snapshot_accumulated_text(buffer: &Mutex<String>) -> String {
    match buffer.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}
