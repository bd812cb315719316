//! Extraction of structured game data embedded in narrator prose.
//!
//! A narrator response is free text optionally followed by a `<gamedata>`
//! block. Everything before the block is shown to the player; the block itself
//! carries machine-readable updates:
//!
//! ```text
//! The innkeeper nods at you.
//! <gamedata>
//! <journal>Met the innkeeper of the Drowned Rat.</journal>
//! <npcs><npc name="Marta" description="Stout woman, flour on her apron" /></npcs>
//! <status><Health>95/100</Health></status>
//! <inventory><item name="Rope" quantity="2" /></inventory>
//! <effects><effect name="Tired" duration="2 turns" /></effects>
//! </gamedata>
//! ```
//!
//! The scanner is deliberately forgiving. Each section is parsed on its own and
//! a missing, unterminated or malformed section only loses that section's data.
//! Nothing in this module returns an error: the narrative must always be
//! displayable.

use std::collections::BTreeMap;

use crate::state::{InventoryItem, NpcIntro, StatusUpdate};

const OUTER: &str = "gamedata";

/// Tag names that belong to the markup itself and are never status keys.
const RESERVED: &[&str] = &[
    "gamedata", "journal", "npcs", "npc", "status", "inventory", "item", "effects", "effect",
];

/// Words that announce an inventory listing in a plain-text status report.
const INVENTORY_KEYWORDS: &[&str] = &["inventory", "инвентарь"];

/// One piece of structured data found in a response.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredBlock {
    /// A short note for the player's journal.
    Journal(String),
    /// A character introduced this turn.
    Npc(NpcIntro),
    /// Character sheet changes.
    Status(StatusUpdate),
}

/// The result of splitting a response into prose and structured data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// Prose to show the player, trimmed.
    pub narrative: String,
    /// Structured blocks in document order: journal, NPCs, status.
    pub blocks: Vec<StructuredBlock>,
}

impl Extraction {
    /// The journal note, if the response carried one.
    pub fn journal(&self) -> Option<&str> {
        self.blocks.iter().find_map(|b| match b {
            StructuredBlock::Journal(text) => Some(text.as_str()),
            _ => None,
        })
    }

    /// All NPC introductions.
    pub fn npcs(&self) -> impl Iterator<Item = &NpcIntro> {
        self.blocks.iter().filter_map(|b| match b {
            StructuredBlock::Npc(npc) => Some(npc),
            _ => None,
        })
    }

    /// The status block, if any.
    pub fn status(&self) -> Option<&StatusUpdate> {
        self.blocks.iter().find_map(|b| match b {
            StructuredBlock::Status(status) => Some(status),
            _ => None,
        })
    }

    /// Take ownership of the status block, if any.
    pub fn take_status(&mut self) -> Option<StatusUpdate> {
        let index = self
            .blocks
            .iter()
            .position(|b| matches!(b, StructuredBlock::Status(_)))?;
        match self.blocks.remove(index) {
            StructuredBlock::Status(status) => Some(status),
            _ => None,
        }
    }
}

/// Split a completed response into narrative text and structured blocks.
pub fn parse(text: &str) -> Extraction {
    let Some(open) = find_open(text, OUTER, 0) else {
        return Extraction {
            narrative: text.trim().to_string(),
            blocks: Vec::new(),
        };
    };

    let narrative = text[..open.start].trim().to_string();

    let body = if open.self_closing {
        None
    } else {
        find_close(text, OUTER, open.content_start).map(|close| &text[open.content_start..close.start])
    };

    let Some(body) = body else {
        tracing::debug!("gamedata block is not terminated; dropping structured data");
        return Extraction {
            narrative,
            blocks: Vec::new(),
        };
    };

    let mut blocks = Vec::new();

    if let Some(note) = section(body, "journal").map(decode_entities) {
        let note = note.trim();
        if !note.is_empty() {
            blocks.push(StructuredBlock::Journal(note.to_string()));
        }
    }

    // Bare <npc> elements are accepted; an unterminated <npcs> yields nothing.
    let npc_scope = match section(body, "npcs") {
        Some(scope) => Some(scope),
        None if find_open(body, "npcs", 0).is_none() => Some(body),
        None => None,
    };
    if let Some(scope) = npc_scope {
        blocks.extend(parse_npcs(scope).into_iter().map(StructuredBlock::Npc));
    }

    if let Some(status) = parse_status_sections(body) {
        blocks.push(StructuredBlock::Status(status));
    }

    Extraction { narrative, blocks }
}

fn parse_npcs(scope: &str) -> Vec<NpcIntro> {
    elements(scope, "npc")
        .into_iter()
        .filter_map(|attrs| {
            let name = attr(&attrs, "name")?.trim();
            let description = attr(&attrs, "description")?.trim();
            if name.is_empty() || description.is_empty() {
                return None;
            }
            Some(NpcIntro {
                name: name.to_string(),
                description: description.to_string(),
            })
        })
        .collect()
}

fn parse_status_sections(body: &str) -> Option<StatusUpdate> {
    let status = section(body, "status");
    let inventory = section(body, "inventory");
    let effects = section(body, "effects");

    if status.is_none() && inventory.is_none() && effects.is_none() {
        return None;
    }

    let mut attributes = BTreeMap::new();
    if let Some(content) = status {
        collect_pairs(content, &mut attributes);
    }

    Some(StatusUpdate {
        attributes,
        inventory: inventory.map(parse_inventory),
        effects: effects.map(parse_effects),
    })
}

fn parse_inventory(content: &str) -> Vec<InventoryItem> {
    elements(content, "item")
        .into_iter()
        .filter_map(|attrs| {
            let name = attr(&attrs, "name")?.trim();
            if name.is_empty() {
                return None;
            }
            let quantity = attr(&attrs, "quantity")
                .and_then(|q| q.trim().parse::<u32>().ok())
                .filter(|q| *q >= 1)
                .unwrap_or(1);
            Some(InventoryItem::new(name, quantity))
        })
        .collect()
}

fn parse_effects(content: &str) -> Vec<String> {
    elements(content, "effect")
        .into_iter()
        .filter_map(|attrs| {
            let name = attr(&attrs, "name")?.trim();
            if name.is_empty() {
                return None;
            }
            match attr(&attrs, "duration").map(str::trim) {
                Some(duration) if !duration.is_empty() => Some(format!("{name} ({duration})")),
                _ => Some(name.to_string()),
            }
        })
        .collect()
}

/// Collect `<Key>value</Key>` pairs. A value that itself holds pairs is
/// descended into instead of being stored raw.
fn collect_pairs(content: &str, out: &mut BTreeMap<String, String>) -> usize {
    let mut found = 0;
    let mut pos = 0;

    while let Some(rel) = content[pos..].find('<') {
        let lt = pos + rel;
        let Some((key, content_start)) = pair_opening(content, lt) else {
            pos = lt + 1;
            continue;
        };

        if RESERVED.iter().any(|r| r.eq_ignore_ascii_case(key)) {
            // Skip the whole reserved section so its items are not read as keys.
            pos = find_close(content, key, content_start)
                .map(|close| close.end)
                .unwrap_or(content_start);
            continue;
        }

        let Some(close) = find_exact_close(content, key, content_start) else {
            pos = content_start;
            continue;
        };

        let inner = &content[content_start..close.start];
        if collect_pairs(inner, out) == 0 {
            let value = decode_entities(inner.trim());
            if !value.is_empty() {
                out.insert(key.to_string(), value);
                found += 1;
            }
        } else {
            found += 1;
        }
        pos = close.end;
    }

    found
}

/// Recognize `<Key>` at `lt`, returning the key and the offset after `>`.
fn pair_opening(content: &str, lt: usize) -> Option<(&str, usize)> {
    let rest = &content[lt + 1..];
    let mut chars = rest.char_indices();
    let (_, first) = chars.next()?;
    if !(first.is_alphabetic() || first == '_') {
        return None;
    }

    let mut end = first.len_utf8();
    for (i, c) in chars {
        if c.is_alphanumeric() || c == '_' || c == '-' {
            end = i + c.len_utf8();
        } else {
            break;
        }
    }

    let key = &rest[..end];
    let after = rest[end..].trim_start();
    if !after.starts_with('>') {
        return None;
    }
    let gt = lt + 1 + (rest.len() - after.len());
    Some((key, gt + 1))
}

fn find_exact_close(content: &str, key: &str, from: usize) -> Option<Span> {
    let needle = format!("</{key}");
    let mut pos = from;
    while let Some(rel) = content[pos..].find(&needle) {
        let start = pos + rel;
        let after = &content[start + needle.len()..];
        let trimmed = after.trim_start();
        if trimmed.starts_with('>') {
            let end = start + needle.len() + (after.len() - trimmed.len()) + 1;
            return Some(Span { start, end });
        }
        pos = start + needle.len();
    }
    None
}

/// Parse a plain-text status report (no markup) as a fallback.
///
/// `Key: value` lines become attributes. After a line mentioning the
/// inventory, bullet lines such as `- Torch (x3)` become items until a blank
/// line or a non-bullet `Key: value` line ends the listing.
pub fn parse_plain_status(text: &str) -> Option<StatusUpdate> {
    let mut attributes = BTreeMap::new();
    let mut inventory = Vec::new();
    let mut in_inventory = false;

    for line in text.lines() {
        let lower = line.to_lowercase();
        if INVENTORY_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            in_inventory = true;
            continue;
        }

        if in_inventory {
            if let Some(item) = parse_bullet_item(line) {
                inventory.push(item);
            } else if line.trim().is_empty() || (line.contains(':') && !is_bullet(line)) {
                in_inventory = false;
            }
        }

        if !in_inventory {
            if let Some((key, value)) = line.split_once(':') {
                let key = strip_bullet(key.trim())
                    .trim_matches(|c| c == '*' || c == '_')
                    .trim();
                let value = value.trim().trim_start_matches(|c| c == '*' || c == '_').trim();
                let key_lower = key.to_lowercase();
                if !key.is_empty()
                    && !value.is_empty()
                    && !INVENTORY_KEYWORDS.iter().any(|kw| key_lower.contains(kw))
                {
                    attributes.insert(key.to_string(), value.to_string());
                }
            }
        }
    }

    if attributes.is_empty() && inventory.is_empty() {
        return None;
    }

    Some(StatusUpdate {
        attributes,
        inventory: (!inventory.is_empty()).then_some(inventory),
        effects: None,
    })
}

fn is_bullet(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with('-') || t.starts_with('*')
}

fn strip_bullet(s: &str) -> &str {
    let t = s.trim_start();
    match t.strip_prefix('-').or_else(|| t.strip_prefix('*')) {
        Some(rest) if !rest.starts_with('*') => rest.trim_start(),
        _ => t,
    }
}

fn parse_bullet_item(line: &str) -> Option<InventoryItem> {
    if !is_bullet(line) {
        return None;
    }
    let body = strip_bullet(line).trim();
    if body.is_empty() {
        return None;
    }

    if let Some(open) = body.rfind('(') {
        if let Some(inner) = body[open + 1..].strip_suffix(')') {
            let count = inner
                .strip_prefix('x')
                .or_else(|| inner.strip_prefix('х'))
                .and_then(|n| n.parse::<u32>().ok());
            if let Some(count) = count {
                let name = body[..open].trim();
                if !name.is_empty() {
                    return Some(InventoryItem::new(name, count.max(1)));
                }
            }
        }
    }

    Some(InventoryItem::new(body, 1))
}

// ============================================================================
// Tag scanner
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
}

#[derive(Debug, Clone, Copy)]
struct OpenTag {
    start: usize,
    content_start: usize,
    self_closing: bool,
}

/// Content of a `<name>...</name>` section, or `None` when it is absent,
/// unterminated or self-closing.
fn section<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    let open = find_open(body, name, 0)?;
    if open.self_closing {
        return Some("");
    }
    let close = find_close(body, name, open.content_start)?;
    Some(&body[open.content_start..close.start])
}

/// Attribute lists of every `<name .../>` (or `<name ...>`) element in `scope`.
fn elements(scope: &str, name: &str) -> Vec<Vec<(String, String)>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(open) = find_open(scope, name, pos) {
        let tag = &scope[open.start + 1 + name.len()..open.content_start - 1];
        out.push(parse_attributes(tag.trim_end_matches('/')));
        pos = open.content_start;
    }
    out
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// Find `<name` followed by whitespace, `/` or `>`, matched case-insensitively.
fn find_open(text: &str, name: &str, from: usize) -> Option<OpenTag> {
    let bytes = text.as_bytes();
    let mut pos = from;
    while let Some(rel) = text.get(pos..)?.find('<') {
        let start = pos + rel;
        let name_end = start + 1 + name.len();
        let matches_name = bytes
            .get(start + 1..name_end)
            .is_some_and(|b| b.eq_ignore_ascii_case(name.as_bytes()));
        let boundary = bytes
            .get(name_end)
            .is_some_and(|b| *b == b'>' || *b == b'/' || b.is_ascii_whitespace());

        if matches_name && boundary {
            let Some(gt) = tag_end(text, name_end) else {
                pos = start + 1;
                continue;
            };
            let self_closing = text[name_end..gt].trim_end().ends_with('/');
            return Some(OpenTag {
                start,
                content_start: gt + 1,
                self_closing,
            });
        }
        pos = start + 1;
    }
    None
}

/// Find `</name>` (whitespace allowed before `>`), matched case-insensitively.
fn find_close(text: &str, name: &str, from: usize) -> Option<Span> {
    let bytes = text.as_bytes();
    let mut pos = from;
    while let Some(rel) = text.get(pos..)?.find("</") {
        let start = pos + rel;
        let name_end = start + 2 + name.len();
        let matches_name = bytes
            .get(start + 2..name_end)
            .is_some_and(|b| b.eq_ignore_ascii_case(name.as_bytes()));
        if matches_name {
            let after = &text[name_end..];
            let trimmed = after.trim_start();
            if trimmed.starts_with('>') {
                return Some(Span {
                    start,
                    end: name_end + (after.len() - trimmed.len()) + 1,
                });
            }
        }
        pos = start + 2;
    }
    None
}

/// Offset of the `>` closing a tag, skipping over quoted attribute values.
fn tag_end(text: &str, from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in text[from..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(from + i),
            (None, '<') => return None,
            _ => {}
        }
    }
    None
}

fn parse_attributes(tag: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut rest = tag;

    loop {
        rest = rest.trim_start();
        let name_len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-' || c == ':'))
            .unwrap_or(rest.len());
        if name_len == 0 {
            break;
        }
        let name = rest[..name_len].to_ascii_lowercase();
        rest = rest[name_len..].trim_start();

        let Some(after_eq) = rest.strip_prefix('=') else {
            // Bare attribute without a value.
            continue;
        };
        rest = after_eq.trim_start();

        let value = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let inner = &rest[1..];
                let Some(end) = inner.find(q) else {
                    break;
                };
                let value = &inner[..end];
                rest = &inner[end + 1..];
                value
            }
            Some(_) => {
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == '/')
                    .unwrap_or(rest.len());
                let value = &rest[..end];
                rest = &rest[end..];
                value
            }
            None => break,
        };

        attrs.push((name, decode_entities(value)));
    }

    attrs
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
