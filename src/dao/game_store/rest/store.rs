//! HTTP side of the hosted store.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::{
    error::{RestDaoError, RestResult},
    models::{
        ClaimPlayerSlotArgs, ROOM_FULL_MESSAGE, RoomStatusPatch, RoundCompletionPatch,
        StoreErrorBody,
    },
    realtime,
};
use crate::{
    config::StoreConfig,
    dao::{
        changes::{ChangeFilter, Subscription, Table},
        game_store::GameStore,
        models::{
            GameRoundEntity, GameSessionEntity, NewGameRound, NewGameSession, NewPlayer, NewRoom,
            PlayerEntity, RoomEntity, RoomStatus, SessionPatch,
        },
        storage::{StorageError, StorageResult},
    },
};

type Query = Vec<(&'static str, String)>;

/// Upper bound for one HTTP exchange with the store.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Store backed by a hosted PostgREST endpoint with a Realtime websocket for notifications.
#[derive(Clone)]
pub struct RestStore {
    client: Client,
    rest_url: Arc<str>,
    socket_url: Arc<str>,
    key: Arc<str>,
}

impl RestStore {
    /// Build the HTTP client and check that the endpoint answers.
    pub async fn connect(config: StoreConfig) -> RestResult<Self> {
        let base = config.url.trim_end_matches('/');
        let socket_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(RestDaoError::InvalidUrl { url: config.url });
        };

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| RestDaoError::ClientBuilder { source })?;

        let store = Self {
            client,
            rest_url: Arc::from(format!("{base}/rest/v1")),
            socket_url: Arc::from(format!(
                "{socket_base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
                config.key
            )),
            key: Arc::from(config.key),
        };

        store.ping().await?;
        Ok(store)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.rest_url, path);
        self.client
            .request(method, url)
            .header("apikey", self.key.as_ref())
            .bearer_auth(self.key.as_ref())
    }

    async fn ping(&self) -> RestResult<()> {
        let path = Table::Rooms.as_str();
        let response = self
            .request(Method::GET, path)
            .query(&[("select", "id"), ("limit", "1")])
            .send()
            .await
            .map_err(|source| RestDaoError::RequestSend {
                path: path.to_string(),
                source,
            })?;
        check_status(path, response).await.map(|_| ())
    }

    async fn select<T>(&self, table: Table, query: Query) -> RestResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let path = table.as_str();
        let response = self
            .request(Method::GET, path)
            .query(&query)
            .send()
            .await
            .map_err(|source| RestDaoError::RequestSend {
                path: path.to_string(),
                source,
            })?;
        decode_rows(path, response).await
    }

    async fn select_one<T>(&self, table: Table, mut query: Query) -> RestResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        query.push(("limit", "1".into()));
        Ok(self.select(table, query).await?.into_iter().next())
    }

    async fn insert<B, T>(&self, table: Table, body: &B) -> RestResult<T>
    where
        B: ?Sized + Serialize,
        T: DeserializeOwned,
    {
        let path = table.as_str();
        let response = self
            .request(Method::POST, path)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await
            .map_err(|source| RestDaoError::RequestSend {
                path: path.to_string(),
                source,
            })?;
        first_row(path, response).await
    }

    /// PATCH the rows matching `query`, returning what the store wrote (possibly nothing).
    async fn update<B, T>(&self, table: Table, query: Query, body: &B) -> RestResult<Vec<T>>
    where
        B: ?Sized + Serialize,
        T: DeserializeOwned,
    {
        let path = table.as_str();
        let response = self
            .request(Method::PATCH, path)
            .header("Prefer", "return=representation")
            .query(&query)
            .json(body)
            .send()
            .await
            .map_err(|source| RestDaoError::RequestSend {
                path: path.to_string(),
                source,
            })?;
        decode_rows(path, response).await
    }

    async fn rpc<B, T>(&self, function: &str, body: &B) -> RestResult<T>
    where
        B: ?Sized + Serialize,
        T: DeserializeOwned,
    {
        let path = format!("rpc/{function}");
        let response = self
            .request(Method::POST, &path)
            .json(body)
            .send()
            .await
            .map_err(|source| RestDaoError::RequestSend {
                path: path.clone(),
                source,
            })?;
        let response = check_status(&path, response).await?;
        response
            .json::<T>()
            .await
            .map_err(|source| RestDaoError::DecodeResponse { path, source })
    }

    /// Update by id and fail with `NotFound` when nothing matched.
    async fn update_by_id<B, T>(&self, table: Table, id: Uuid, body: &B) -> StorageResult<T>
    where
        B: ?Sized + Serialize,
        T: DeserializeOwned,
    {
        let rows = self
            .update::<B, T>(table, vec![("id", eq(id))], body)
            .await?;
        rows.into_iter()
            .next()
            .ok_or(StorageError::NotFound { table, id })
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

/// Error for a slot claim the RPC refused; a full room is reported by its own message.
fn claim_failure(err: RestDaoError, room_id: Uuid, capacity: usize) -> StorageError {
    if err.store_message() == Some(ROOM_FULL_MESSAGE) {
        return StorageError::CapacityReached { room_id, capacity };
    }
    err.into()
}

/// Error for a version-guarded update that matched nothing: a stale version if the row is
/// still there, otherwise a missing row.
fn missed_update(table: Table, id: Uuid, expected_version: u64, row_exists: bool) -> StorageError {
    if row_exists {
        StorageError::Conflict {
            table,
            id,
            expected_version,
        }
    } else {
        StorageError::NotFound { table, id }
    }
}

async fn check_status(path: &str, response: Response) -> RestResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<StoreErrorBody>(&body)
        .ok()
        .and_then(|parsed| parsed.message)
        .unwrap_or(body);
    Err(RestDaoError::RequestStatus {
        path: path.to_string(),
        status,
        message,
    })
}

async fn decode_rows<T>(path: &str, response: Response) -> RestResult<Vec<T>>
where
    T: DeserializeOwned,
{
    let response = check_status(path, response).await?;
    response
        .json::<Vec<T>>()
        .await
        .map_err(|source| RestDaoError::DecodeResponse {
            path: path.to_string(),
            source,
        })
}

async fn first_row<T>(path: &str, response: Response) -> RestResult<T>
where
    T: DeserializeOwned,
{
    decode_rows(path, response)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| RestDaoError::EmptyRepresentation {
            path: path.to_string(),
        })
}

impl GameStore for RestStore {
    fn insert_room(&self, room: NewRoom) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.insert(Table::Rooms, &room).await?) })
    }

    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .select_one(Table::Rooms, vec![("id", eq(id))])
                .await?)
        })
    }

    fn find_waiting_room(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let query = vec![
                ("room_code", eq(code)),
                ("status", eq(RoomStatus::Waiting.as_str())),
                ("order", "created_at.desc".into()),
            ];
            Ok(store.select_one(Table::Rooms, query).await?)
        })
    }

    fn update_room_status(
        &self,
        id: Uuid,
        status: RoomStatus,
    ) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_by_id(Table::Rooms, id, &RoomStatusPatch { status })
                .await
        })
    }

    fn insert_player(
        &self,
        player: NewPlayer,
        capacity: usize,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let args = ClaimPlayerSlotArgs {
                p_room_id: player.room_id,
                p_nickname: &player.nickname,
                p_avatar: &player.avatar,
                p_capacity: capacity,
            };
            store
                .rpc::<_, PlayerEntity>("claim_player_slot", &args)
                .await
                .map_err(|err| claim_failure(err, player.room_id, capacity))
        })
    }

    fn list_players(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let query = vec![
                ("room_id", eq(room_id)),
                ("order", "joined_at.asc,id.asc".into()),
            ];
            Ok(store.select(Table::Players, query).await?)
        })
    }

    fn insert_session(
        &self,
        session: NewGameSession,
    ) -> BoxFuture<'static, StorageResult<GameSessionEntity>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.insert(Table::GameSessions, &session).await?) })
    }

    fn latest_session(
        &self,
        room_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<GameSessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let query = vec![
                ("room_id", eq(room_id)),
                ("order", "started_at.desc".into()),
            ];
            Ok(store.select_one(Table::GameSessions, query).await?)
        })
    }

    fn update_session(
        &self,
        id: Uuid,
        expected_version: u64,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<GameSessionEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let table = Table::GameSessions;
            // The row's trigger bumps `version`; the filter turns the PATCH into a CAS.
            let query = vec![("id", eq(id)), ("version", eq(expected_version))];
            let rows: Vec<GameSessionEntity> = store.update(table, query, &patch).await?;
            if let Some(row) = rows.into_iter().next() {
                return Ok(row);
            }

            let existing: Option<Value> = store
                .select_one(table, vec![("select", "id".into()), ("id", eq(id))])
                .await?;
            debug!(session_id = %id, expected_version, "version-guarded update matched no row");
            Err(missed_update(table, id, expected_version, existing.is_some()))
        })
    }

    fn insert_round(
        &self,
        round: NewGameRound,
    ) -> BoxFuture<'static, StorageResult<GameRoundEntity>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.insert(Table::GameRounds, &round).await?) })
    }

    fn complete_round(
        &self,
        id: Uuid,
        answer: Option<String>,
    ) -> BoxFuture<'static, StorageResult<GameRoundEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let patch = RoundCompletionPatch {
                completed: true,
                answer,
                completed_at: OffsetDateTime::now_utc(),
            };
            store.update_by_id(Table::GameRounds, id, &patch).await
        })
    }

    fn list_rounds(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<GameRoundEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let query = vec![
                ("session_id", eq(session_id)),
                ("order", "round_number.asc".into()),
            ];
            Ok(store.select(Table::GameRounds, query).await?)
        })
    }

    fn subscribe(&self, filter: ChangeFilter) -> BoxFuture<'static, StorageResult<Subscription>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(realtime::open_channel(&store.socket_url, &store.key, filter).await?)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.ping().await?) })
    }
}
