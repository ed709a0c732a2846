//! Outbound command translation: validate a browser send request and map it
//! to the provider REST call that performs it.

use serde_json::{Map, Value, json};

/// Validation failures. The display strings are returned to the caller
/// verbatim.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Invalid body")]
    Body,
    #[error("Invalid type")]
    Type,
    #[error("Invalid chatId")]
    ChatId,
    #[error("Invalid session")]
    Session,
    #[error("Invalid text")]
    Text,
    #[error("Invalid preview")]
    Preview,
    #[error("Invalid fileUrl")]
    FileUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    File,
    Voice,
    Video,
}

impl MediaKind {
    fn path(self) -> &'static str {
        match self {
            MediaKind::Image => "/api/sendImage",
            MediaKind::File => "/api/sendFile",
            MediaKind::Voice => "/api/sendVoice",
            MediaKind::Video => "/api/sendVideo",
        }
    }

    fn default_mimetype(self) -> &'static str {
        match self {
            MediaKind::Image => "image/jpeg",
            MediaKind::File => "application/octet-stream",
            MediaKind::Voice => "audio/ogg; codecs=opus",
            MediaKind::Video => "video/mp4",
        }
    }

    fn default_filename(self) -> Option<&'static str> {
        match self {
            MediaKind::Image => Some("image.jpg"),
            MediaKind::File => Some("file"),
            MediaKind::Voice => None,
            MediaKind::Video => Some("video.mp4"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPreview {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendCommand {
    Text {
        chat_id: String,
        session: String,
        text: String,
    },
    Media {
        kind: MediaKind,
        chat_id: String,
        session: String,
        file_url: String,
        mimetype: Option<String>,
        filename: Option<String>,
        caption: Option<String>,
        convert: Option<bool>,
        as_note: Option<bool>,
    },
    LinkPreview {
        chat_id: String,
        session: String,
        text: String,
        preview: LinkPreview,
        high_quality: Option<bool>,
    },
}

/// A provider REST call: `POST <api base><path>` with a JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCall {
    pub path: &'static str,
    pub body: Value,
}

impl SendCommand {
    /// Validate a decoded request body. The first failing check wins.
    pub fn parse(raw: &Value) -> Result<Self, CommandError> {
        let obj = raw.as_object().ok_or(CommandError::Body)?;
        let ty = obj.get("type").and_then(Value::as_str);
        let kind = match ty {
            Some("text") => None,
            Some("link-custom-preview") => None,
            Some("image") => Some(MediaKind::Image),
            Some("file") => Some(MediaKind::File),
            Some("voice") => Some(MediaKind::Voice),
            Some("video") => Some(MediaKind::Video),
            _ => return Err(CommandError::Type),
        };
        let chat_id = required(obj, "chatId").ok_or(CommandError::ChatId)?;
        let session = required(obj, "session").ok_or(CommandError::Session)?;

        let Some(kind) = kind else {
            let text = required(obj, "text").ok_or(CommandError::Text)?;
            if ty == Some("text") {
                return Ok(SendCommand::Text {
                    chat_id,
                    session,
                    text,
                });
            }
            let preview = obj
                .get("preview")
                .and_then(Value::as_object)
                .ok_or(CommandError::Preview)?;
            let url = required(preview, "url").ok_or(CommandError::Preview)?;
            return Ok(SendCommand::LinkPreview {
                chat_id,
                session,
                text,
                preview: LinkPreview {
                    url,
                    title: optional_str(preview, "title"),
                    description: optional_str(preview, "description"),
                    image_url: optional_str(preview, "imageUrl"),
                },
                high_quality: optional_bool(obj, "linkPreviewHighQuality"),
            });
        };

        let file_url = required(obj, "fileUrl").ok_or(CommandError::FileUrl)?;
        let voice = kind == MediaKind::Voice;
        Ok(SendCommand::Media {
            kind,
            chat_id,
            session,
            file_url,
            mimetype: optional_str(obj, "mimetype"),
            filename: if voice { None } else { optional_str(obj, "filename") },
            caption: if voice { None } else { optional_str(obj, "caption") },
            convert: optional_bool(obj, "convert"),
            as_note: if voice { None } else { optional_bool(obj, "asNote") },
        })
    }

    pub fn to_call(&self) -> ProviderCall {
        match self {
            SendCommand::Text {
                chat_id,
                session,
                text,
            } => ProviderCall {
                path: "/api/sendText",
                body: json!({
                    "chatId": to_chat_id(chat_id),
                    "text": text,
                    "session": session,
                }),
            },
            SendCommand::Media {
                kind,
                chat_id,
                session,
                file_url,
                mimetype,
                filename,
                caption,
                convert,
                as_note,
            } => {
                let mut file = Map::new();
                file.insert("url".into(), json!(file_url));
                let mimetype =
                    mimetype.as_deref().unwrap_or(kind.default_mimetype());
                file.insert("mimetype".into(), json!(mimetype));
                if let Some(default) = kind.default_filename() {
                    file.insert(
                        "filename".into(),
                        json!(filename.as_deref().unwrap_or(default)),
                    );
                }

                let mut body = Map::new();
                body.insert("chatId".into(), json!(to_chat_id(chat_id)));
                body.insert("file".into(), Value::Object(file));
                if *kind != MediaKind::Voice {
                    body.insert("caption".into(), json!(caption));
                }
                if matches!(kind, MediaKind::Voice | MediaKind::Video) {
                    body.insert(
                        "convert".into(),
                        json!(convert.unwrap_or(true)),
                    );
                }
                if *kind == MediaKind::Video {
                    body.insert(
                        "asNote".into(),
                        json!(as_note.unwrap_or(false)),
                    );
                }
                body.insert("session".into(), json!(session));
                ProviderCall {
                    path: kind.path(),
                    body: Value::Object(body),
                }
            }
            SendCommand::LinkPreview {
                chat_id,
                session,
                text,
                preview,
                high_quality,
            } => {
                let mut card = Map::new();
                card.insert("url".into(), json!(preview.url));
                card.insert(
                    "title".into(),
                    json!(preview.title.as_deref().unwrap_or("Preview")),
                );
                card.insert(
                    "description".into(),
                    json!(preview.description.as_deref().unwrap_or("")),
                );
                if let Some(image) =
                    preview.image_url.as_deref().filter(|s| !s.is_empty())
                {
                    card.insert("image".into(), json!({ "url": image }));
                }
                ProviderCall {
                    path: "/api/send/link-custom-preview",
                    body: json!({
                        "chatId": to_chat_id(chat_id),
                        "text": text,
                        "linkPreviewHighQuality": high_quality.unwrap_or(true),
                        "preview": Value::Object(card),
                        "session": session,
                    }),
                }
            }
        }
    }
}

/// Bare phone numbers become personal chat ids.
pub fn to_chat_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.contains('@') {
        return trimmed.to_string();
    }
    format!("{trimmed}@c.us")
}

fn required(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn optional_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn optional_bool(obj: &Map<String, Value>, key: &str) -> Option<bool> {
    obj.get(key).and_then(Value::as_bool)
}
