// ===============================
// src/lobby.rs
// ===============================
//
// HTTP side of the server: room creation only. Joining happens over the
// websocket with the returned code.
//
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::domain::{RoomCode, ValidationError};

#[derive(Debug, Error)]
pub enum LobbyError {
    #[error("lobby request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("lobby answered with an invalid room code: {0}")]
    BadCode(#[from] ValidationError),
}

#[derive(Serialize)]
struct CreateRoom<'a> {
    nickname: &'a str,
}

#[derive(Deserialize)]
struct CreateRoomReply {
    result: String,
}

pub fn rooms_endpoint(lobby_url: &str) -> String {
    format!("{}/api/rooms", lobby_url.trim_end_matches('/'))
}

fn parse_reply(body: &str) -> Result<RoomCode, LobbyError> {
    let reply: CreateRoomReply = match serde_json::from_str(body) {
        Ok(r) => r,
        // bare code (no wrapper object)
        Err(_) => CreateRoomReply { result: body.trim().trim_matches('"').to_string() },
    };
    Ok(RoomCode::parse(&reply.result)?)
}

pub async fn create_room(
    http: &reqwest::Client,
    lobby_url: &str,
    nickname: &str,
) -> Result<RoomCode, LobbyError> {
    let url = rooms_endpoint(lobby_url);
    let body = http
        .post(&url)
        .json(&CreateRoom { nickname })
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let code = parse_reply(&body)?;
    info!(%code, %nickname, "room created");
    Ok(code)
}
