use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    PlainText { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::PlainText { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Context { block_id: String, elements: Vec<TextObject> },
}

/// Reply body. `fallback_text` becomes the `text` field of `chat.postMessage`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

impl MessageTemplate {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self { fallback_text: text.into(), blocks: Vec::new() }
    }
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Section { block_id: block_id.into(), text: builder.build() });
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Context { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> TextObject {
        self.text.unwrap_or_else(|| TextObject::plain(""))
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

pub fn detector_opt_out_message(
    user_id: &str,
    persona: &str,
    optin_command: &str,
    changed: bool,
) -> MessageTemplate {
    let summary = if changed {
        format!("<@{user_id}> opted out. {persona} will no longer read your messages.")
    } else {
        format!("<@{user_id}> was already opted out of {persona}.")
    };
    MessageBuilder::new(summary.clone())
        .section("detector.optout.summary.v1", |section| {
            section.mrkdwn(summary);
        })
        .context("detector.optout.context.v1", |context| {
            context.plain(format!("Send `{optin_command}` to opt back in."));
        })
        .build()
}

pub fn detector_opt_in_message(user_id: &str, persona: &str, changed: bool) -> MessageTemplate {
    let summary = if changed {
        format!("<@{user_id}> opted back in to {persona}.")
    } else {
        format!("<@{user_id}> was not opted out of {persona}.")
    };
    MessageBuilder::new(summary.clone())
        .section("detector.optin.summary.v1", |section| {
            section.mrkdwn(summary);
        })
        .build()
}

pub fn detector_alias_message(user_id: &str, alias: &str) -> MessageTemplate {
    MessageBuilder::new(format!("Linked <@{user_id}> to {alias}"))
        .section("detector.alias.summary.v1", |section| {
            section.mrkdwn(format!("Linked <@{user_id}> to `{alias}`."));
        })
        .build()
}

pub fn feature_opt_out_message(feature: &str, name: &str) -> MessageTemplate {
    MessageBuilder::new(format!("{name} opted out of {feature}"))
        .section("feature.optout.summary.v1", |section| {
            section.mrkdwn(format!("`{name}` will be left out of `{feature}` from now on."));
        })
        .build()
}

pub fn feature_opt_in_message(feature: &str, name: &str) -> MessageTemplate {
    MessageBuilder::new(format!("{name} opted in to {feature}"))
        .section("feature.optin.summary.v1", |section| {
            section.mrkdwn(format!("`{name}` is taking part in `{feature}` again."));
        })
        .build()
}

pub fn feature_link_message(feature: &str, user_id: &str, service_id: &str) -> MessageTemplate {
    MessageBuilder::new(format!("Linked <@{user_id}> to {service_id} for {feature}"))
        .section("feature.link.summary.v1", |section| {
            section.mrkdwn(format!("<@{user_id}> is `{service_id}` in `{feature}`."));
        })
        .build()
}

/// Answer to a command the handler could not make sense of.
pub fn unsure_message() -> MessageTemplate {
    MessageTemplate::text_only("unsure")
}
