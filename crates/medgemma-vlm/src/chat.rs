/*
    Structured chat messages rendered into a raw prompt with the checkpoint's Jinja chat
    template, the same way `apply_chat_template` does on the Python side.
*/

use minijinja::{context, AutoEscape, Environment, ErrorKind};
use serde::Serialize;

use crate::error::VlmError;

/// Gemma 3 chat template, used when a checkpoint does not ship its own.
pub const GEMMA_CHAT_TEMPLATE: &str = r#"{{ bos_token }}
{%- if messages[0]['role'] == 'system' -%}
    {%- if messages[0]['content'] is string -%}
        {%- set first_user_prefix = messages[0]['content'] + '\n\n' -%}
    {%- else -%}
        {%- set first_user_prefix = messages[0]['content'][0]['text'] + '\n\n' -%}
    {%- endif -%}
    {%- set loop_messages = messages[1:] -%}
{%- else -%}
    {%- set first_user_prefix = "" -%}
    {%- set loop_messages = messages -%}
{%- endif -%}
{%- for message in loop_messages -%}
    {%- if (message['role'] == 'user') != (loop.index0 % 2 == 0) -%}
        {{ raise_exception("Conversation roles must alternate user/assistant/user/assistant/...") }}
    {%- endif -%}
    {%- if (message['role'] == 'assistant') -%}
        {%- set role = "model" -%}
    {%- else -%}
        {%- set role = message['role'] -%}
    {%- endif -%}
    {{ '<start_of_turn>' + role + '\n' + (first_user_prefix if loop.first else "") }}
    {%- if message['content'] is string -%}
        {{ message['content'] | trim }}
    {%- elif message['content'] is iterable -%}
        {%- for item in message['content'] -%}
            {%- if item['type'] == 'image' -%}
                {{ '<start_of_image>' }}
            {%- elif item['type'] == 'text' -%}
                {{ item['text'] | trim }}
            {%- endif -%}
        {%- endfor -%}
    {%- else -%}
        {{ raise_exception("Invalid content type") }}
    {%- endif -%}
    {{ '<end_of_turn>\n' }}
{%- endfor -%}
{%- if add_generation_prompt -%}
    {{'<start_of_turn>model\n'}}
{%- endif -%}
"#;

const GEMMA_BOS_TOKEN: &str = "<bos>";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "lowercase")]
pub enum Line {
    Text { text: String },
    Image,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<Line>,
}

impl Message {
    /// A message holding a single text line.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![Line::Text { text: text.into() }],
        }
    }
}

/// A compiled chat template.
pub struct ChatTemplate {
    env: Environment<'static>,
    bos_token: String,
}

impl ChatTemplate {
    /// Compile `source` as the chat template.
    ///
    /// # Arguments
    ///
    /// * `source` - The Jinja source of the template.
    /// * `bos_token` - The value exposed to the template as `bos_token`.
    pub fn new(source: impl Into<String>, bos_token: impl Into<String>) -> Result<Self, VlmError> {
        let mut env = Environment::new();

        // plain text prompt, not HTML
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.add_function("raise_exception", |msg: String| -> Result<String, minijinja::Error> {
            Err(minijinja::Error::new(ErrorKind::InvalidOperation, msg))
        });
        env.add_template_owned("chat", source.into())?;

        Ok(Self {
            env,
            bos_token: bos_token.into(),
        })
    }

    /// The built-in Gemma 3 template.
    pub fn gemma() -> Result<Self, VlmError> {
        Self::new(GEMMA_CHAT_TEMPLATE, GEMMA_BOS_TOKEN)
    }

    /// Build the template from the json files shipped with a checkpoint.
    ///
    /// The template is taken from `chat_template.json` when given, then from the
    /// `chat_template` field of `tokenizer_config.json`, then the built-in Gemma 3 one.
    pub fn from_tokenizer_config(
        tokenizer_config: &serde_json::Value,
        chat_template_json: Option<&serde_json::Value>,
    ) -> Result<Self, VlmError> {
        let bos_token =
            token_content(&tokenizer_config["bos_token"]).unwrap_or(GEMMA_BOS_TOKEN.to_string());

        let source = chat_template_json
            .and_then(|v| template_source(&v["chat_template"]))
            .or_else(|| template_source(&tokenizer_config["chat_template"]));

        match source {
            Some(source) => Self::new(source, bos_token),
            None => {
                log::warn!("checkpoint ships no chat template, using the built-in Gemma 3 one");
                Self::new(GEMMA_CHAT_TEMPLATE, bos_token)
            }
        }
    }

    #[inline]
    pub fn bos_token(&self) -> &str {
        &self.bos_token
    }

    /// Render `messages` into a prompt.
    ///
    /// # Arguments
    ///
    /// * `messages` - The conversation, optionally starting with a system message.
    /// * `add_generation_prompt` - Whether to open a model turn at the end.
    pub fn render(
        &self,
        messages: &[Message],
        add_generation_prompt: bool,
    ) -> Result<String, VlmError> {
        let template = self.env.get_template("chat")?;
        Ok(template.render(context! {
            messages => messages,
            add_generation_prompt => add_generation_prompt,
            bos_token => &self.bos_token,
        })?)
    }
}

// `chat_template` is either a string or a list of named templates
fn template_source(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(templates) => templates
            .iter()
            .find(|t| t["name"] == "default")
            .or_else(|| templates.first())
            .and_then(|t| t["template"].as_str())
            .map(str::to_string),
        _ => None,
    }
}

// special tokens are either plain strings or `{"content": ...}` objects
fn token_content(value: &serde_json::Value) -> Option<String> {
    value
        .as_str()
        .or_else(|| value["content"].as_str())
        .map(str::to_string)
}
