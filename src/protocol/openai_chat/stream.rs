use crate::config::ChunkFraming;
use crate::util::{push_json_string_escaped, push_u64_decimal};

#[cfg(test)]
use super::{ChatCompletionChunk, ChunkChoice, ChunkDelta};

pub const CHUNK_OBJECT: &str = "chat.completion.chunk";

/// Content of one outgoing chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPayload<'a> {
    /// Incremental assistant text; `finish_reason` is `null`.
    Delta(&'a str),
    /// Terminal chunk with an empty delta.
    Finish(&'a str),
}

/// Chunk identity shared by every record of one response.
#[derive(Debug, Clone, Copy)]
pub struct ChunkHeader<'a> {
    pub id: &'a str,
    pub model: &'a str,
    pub created: u64,
}

/// Typed form of a chunk, used where the record is inspected rather than sent.
#[cfg(test)]
fn build_chunk(header: ChunkHeader<'_>, payload: ChunkPayload<'_>) -> ChatCompletionChunk {
    let (delta, finish_reason) = match payload {
        ChunkPayload::Delta(text) => (
            ChunkDelta {
                content: Some(text.to_owned()),
            },
            None,
        ),
        ChunkPayload::Finish(reason) => (ChunkDelta::default(), Some(reason.to_owned())),
    };
    ChatCompletionChunk {
        id: header.id.to_owned(),
        object: CHUNK_OBJECT.to_owned(),
        created: header.created,
        model: header.model.to_owned(),
        choices: vec![ChunkChoice {
            delta,
            index: 0,
            finish_reason,
        }],
    }
}

/// Encode a chunk with the requested framing, appending to `out`.
///
/// The JSON is written by hand in the same key order `serde_json` would
/// produce for [`ChatCompletionChunk`].
pub fn encode_chunk_into(
    out: &mut String,
    header: ChunkHeader<'_>,
    payload: ChunkPayload<'_>,
    framing: ChunkFraming,
) {
    match framing {
        ChunkFraming::Text => {
            if let ChunkPayload::Delta(text) = payload {
                out.push_str(text);
            }
        }
        ChunkFraming::Ndjson => {
            push_chunk_json(out, header, payload);
            out.push('\n');
        }
        ChunkFraming::Sse => {
            out.push_str("data: ");
            push_chunk_json(out, header, payload);
            out.push_str("\n\n");
        }
    }
}

#[cfg(test)]
fn encode_chunk(
    header: ChunkHeader<'_>,
    payload: ChunkPayload<'_>,
    framing: ChunkFraming,
) -> String {
    let text_len = match payload {
        ChunkPayload::Delta(text) | ChunkPayload::Finish(text) => text.len(),
    };
    let mut out = String::with_capacity(128 + header.id.len() + header.model.len() + text_len);
    encode_chunk_into(&mut out, header, payload, framing);
    out
}

fn push_chunk_json(out: &mut String, header: ChunkHeader<'_>, payload: ChunkPayload<'_>) {
    out.push_str("{\"id\":");
    push_json_string_escaped(out, header.id);
    out.push_str(",\"object\":\"chat.completion.chunk\",\"created\":");
    push_u64_decimal(out, header.created);
    out.push_str(",\"model\":");
    push_json_string_escaped(out, header.model);
    match payload {
        ChunkPayload::Delta(text) => {
            out.push_str(",\"choices\":[{\"delta\":{\"content\":");
            push_json_string_escaped(out, text);
            out.push_str("},\"index\":0,\"finish_reason\":null}]}");
        }
        ChunkPayload::Finish(reason) => {
            out.push_str(",\"choices\":[{\"delta\":{},\"index\":0,\"finish_reason\":");
            push_json_string_escaped(out, reason);
            out.push_str("}]}");
        }
    }
}
