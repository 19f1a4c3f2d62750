use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query as QueryString, State};
use axum::response::IntoResponse;
use axum::{Router, routing::get};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::application::channels::{ConnectionId, Subscription};
use crate::application::errors::ServiceError;
use crate::application::query::Query;
use crate::application::registry::normalize_path;
use crate::application::service::{Method, Params, Provider};
use crate::application::services::authentication;
use crate::bootstrap::app_context::AppContext;
use crate::presentation::http::auth::Bearer;
use crate::presentation::http::fallback;

#[derive(Debug, Deserialize, Clone)]
pub struct AuthQuery {
    pub token: Option<String>,
    pub access_token: Option<String>,
}

/// One request frame: `{ "ack", "method", "path", "id"?, "data"?, "query"? }`.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    ack: Value,
    method: String,
    path: String,
    #[serde(default)]
    id: Value,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    query: Value,
}

/// Per-connection state: the token the connection authenticated with.
pub(crate) struct Session {
    pub id: ConnectionId,
    pub token: Option<String>,
}

pub fn routes(ctx: AppContext) -> Router {
    Router::new()
        .route("/ws", get(ws_entry).fallback(fallback::not_found))
        .with_state(ctx)
}

pub async fn ws_entry(
    ws: WebSocketUpgrade,
    QueryString(query): QueryString<AuthQuery>,
    bearer: Option<Bearer>,
    State(ctx): State<AppContext>,
) -> impl IntoResponse {
    let token = handshake_token(query, bearer);
    ws.on_upgrade(move |socket| peer(socket, ctx, token))
}

/// `token` wins over `access_token`, which wins over the `Authorization` header.
fn handshake_token(query: AuthQuery, bearer: Option<Bearer>) -> Option<String> {
    query.token.or(query.access_token).or(bearer.map(|b| b.0))
}

async fn peer(socket: WebSocket, ctx: AppContext, token: Option<String>) {
    let Subscription {
        id,
        sender,
        mut receiver,
    } = ctx.channels().connect().await;
    let mut session = Session { id, token: None };
    if let Some(token) = token {
        handshake(&ctx, &mut session, &token).await;
    }

    let (mut sink, mut stream) = socket.split();
    // replies and channel events share one ordered outbound queue
    let writer = tokio::spawn(async move {
        while let Some(text) = receiver.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let reply = handle_frame(&ctx, &mut session, &text).await;
                if sender.send(reply).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    ctx.channels().disconnect(id).await;
    writer.abort();
    tracing::info!(connection_id = %id, "socket_closed");
}

/// Authenticates a connection from the token it connected with. A bad token
/// leaves the connection anonymous.
async fn handshake(ctx: &AppContext, session: &mut Session, token: &str) {
    let resolved = match ctx.authentication() {
        Ok(auth) => auth.resolve(token).await,
        Err(e) => Err(e),
    };
    match resolved {
        Ok(result) => {
            let user = result.to_json()["user"].clone();
            ctx.channels().login(session.id, user).await;
            session.token = Some(result.access_token);
        }
        Err(e) => {
            tracing::debug!(connection_id = %session.id, error = %e, "socket_handshake_rejected");
        }
    }
}

/// Answers one text frame with `{ "ack", "result" }` or `{ "ack", "error" }`.
pub(crate) async fn handle_frame(ctx: &AppContext, session: &mut Session, text: &str) -> String {
    let (ack, outcome) = match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) => (envelope.ack.clone(), dispatch(ctx, session, envelope).await),
        Err(e) => (
            Value::Null,
            Err(ServiceError::bad_request(format!("Invalid message: {e}"))),
        ),
    };
    let reply = match outcome {
        Ok(result) => json!({ "ack": ack, "result": result }),
        Err(err) => json!({ "ack": ack, "error": err.to_json() }),
    };
    reply.to_string()
}

fn id_string(id: Value) -> Result<Option<String>, ServiceError> {
    match id {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        _ => Err(ServiceError::bad_request("id must be a string or a number")),
    }
}

async fn dispatch(ctx: &AppContext, session: &mut Session, envelope: Envelope) -> Result<Value, ServiceError> {
    let method: Method = envelope.method.parse()?;
    let query = Query::from_json(&envelope.query)?;
    let id = id_string(envelope.id)?;
    let path = normalize_path(&envelope.path);

    let mut params = Params::external(Provider::Socket, query, session.token.clone());
    params.connection = Some(session.id);
    let result = ctx.call(&path, method, id, envelope.data, params).await?;

    if path == authentication::PATH {
        match method {
            Method::Create => {
                session.token = result
                    .get("accessToken")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let user = result.get("user").cloned().unwrap_or(Value::Null);
                ctx.channels().login(session.id, user).await;
                tracing::debug!(connection_id = %session.id, "socket_login");
            }
            Method::Remove => {
                session.token = None;
                ctx.channels().logout(session.id).await;
                tracing::debug!(connection_id = %session.id, "socket_logout");
            }
            _ => {}
        }
    }
    Ok(result)
}
