use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::storage::EntryMeta;

/// Errors produced while interpreting a raw feed document.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not valid UTF-8.
    #[error("Feed is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// The document is not well-formed XML.
    #[error("XML parse error: {0}")]
    Xml(String),

    /// The root element has no `channel` child.
    #[error("Feed has no channel element")]
    MissingChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    NotSeen,
    Inside,
    Done,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Title,
    Link,
}

#[derive(Debug, Default)]
struct PendingItem {
    title: Option<String>,
    link: Option<String>,
}

impl PendingItem {
    fn set(&mut self, field: Field, text: String) {
        // First occurrence of a field wins within one item
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
        };
        if slot.is_none() {
            *slot = Some(text);
        }
    }
}

// Element depths, counting the document root as 1.
const CHANNEL_DEPTH: usize = 2;
const ITEM_DEPTH: usize = 3;
const FIELD_DEPTH: usize = 4;

/// Parses an RSS document into a map of entry name to entry metadata.
///
/// Only the first `channel` directly under the root element is read. Every
/// `item` in it that carries both a `title` and a `link` child becomes one
/// entry keyed by the title text; items missing either are skipped. When two
/// items share a title the later one wins.
///
/// # Errors
///
/// - [`ParseError::InvalidUtf8`] if the bytes are not UTF-8
/// - [`ParseError::Xml`] if the document is not well-formed
/// - [`ParseError::MissingChannel`] if no `channel` element exists
pub fn parse_entries(raw: &[u8]) -> Result<BTreeMap<String, EntryMeta>, ParseError> {
    let content = std::str::from_utf8(raw)?;

    // SEC-002: quick-xml (0.37) never expands <!ENTITY> declarations; custom
    // entities surface as unescape errors and fail the parse.
    let mut reader = Reader::from_str(content);

    let mut entries = BTreeMap::new();
    let mut buf = Vec::new();
    let mut depth: usize = 0;
    let mut saw_root = false;
    let mut channel = ChannelState::NotSeen;
    let mut item: Option<PendingItem> = None;
    let mut field: Option<(Field, String)> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                depth += 1;
                match depth {
                    1 => saw_root = true,
                    CHANNEL_DEPTH if channel == ChannelState::NotSeen && is(&e, b"channel") => {
                        channel = ChannelState::Inside;
                    }
                    ITEM_DEPTH if channel == ChannelState::Inside && is(&e, b"item") => {
                        item = Some(PendingItem::default());
                    }
                    FIELD_DEPTH if item.is_some() => {
                        field = field_kind(&e).map(|kind| (kind, String::new()));
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => match depth + 1 {
                1 => saw_root = true,
                CHANNEL_DEPTH if channel == ChannelState::NotSeen && is(&e, b"channel") => {
                    channel = ChannelState::Done;
                }
                FIELD_DEPTH => {
                    if let (Some(pending), Some(kind)) = (item.as_mut(), field_kind(&e)) {
                        pending.set(kind, String::new());
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) if depth == FIELD_DEPTH => {
                if let Some((_, text)) = field.as_mut() {
                    let unescaped = e
                        .unescape()
                        .map_err(|err| ParseError::Xml(err.to_string()))?;
                    text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(e)) if depth == FIELD_DEPTH => {
                if let Some((_, text)) = field.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                match depth {
                    FIELD_DEPTH => {
                        if let (Some(pending), Some((kind, text))) = (item.as_mut(), field.take()) {
                            pending.set(kind, text);
                        }
                    }
                    ITEM_DEPTH => {
                        if let Some(PendingItem {
                            title: Some(title),
                            link: Some(link),
                        }) = item.take()
                        {
                            entries.insert(title, EntryMeta { link });
                        }
                    }
                    CHANNEL_DEPTH if channel == ChannelState::Inside => {
                        channel = ChannelState::Done;
                    }
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ParseError::Xml(format!(
                    "{} at byte {}",
                    e,
                    reader.error_position()
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(ParseError::Xml("document has no root element".to_string()));
    }
    if depth != 0 {
        return Err(ParseError::Xml(format!(
            "document ended with {} unclosed element(s)",
            depth
        )));
    }
    if channel == ChannelState::NotSeen {
        return Err(ParseError::MissingChannel);
    }

    Ok(entries)
}

fn is(e: &BytesStart<'_>, name: &[u8]) -> bool {
    e.name().as_ref() == name
}

fn field_kind(e: &BytesStart<'_>) -> Option<Field> {
    match e.name().as_ref() {
        b"title" => Some(Field::Title),
        b"link" => Some(Field::Link),
        _ => None,
    }
}
