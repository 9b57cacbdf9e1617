use std::{collections::BTreeSet, convert::Infallible, sync::Arc};

use axum::{
    Json,
    extract::{FromRequestParts, Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, request::Parts},
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, stream};
use serde::{Deserialize, Serialize};

use crate::{
    capability::authorize,
    catalog::ItemDraft,
    error::AppError,
    model::{AdmissionState, Caller, ItemId, MenuItem, ParticipantId, Role, VoteRecord},
    state::State as Canteen,
};

pub const PARTICIPANT_HEADER: &str = "x-participant-id";
pub const ROLE_HEADER: &str = "x-participant-role";

type Shared = State<Arc<Canteen>>;

/// Identity stamped by the upstream identity provider. Anonymous when the headers are missing or
/// unreadable.
pub struct Identity(pub Option<Caller>);

impl Identity {
    fn require(&self, tier: Role) -> Result<Caller, AppError> {
        Ok(*authorize(self.0.as_ref(), tier)?)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Identity(caller_from_headers(&parts.headers)))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn caller_from_headers(headers: &HeaderMap) -> Option<Caller> {
    let participant = header(headers, PARTICIPANT_HEADER)?.trim().parse().ok()?;
    let role = header(headers, ROLE_HEADER)?.parse().ok()?;

    Some(Caller {
        participant: ParticipantId(participant),
        role,
    })
}

fn payload<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|_| AppError::MalformedPayload)
}

#[derive(Deserialize)]
pub struct VoteRequest {
    pub item: ItemId,
    #[serde(default)]
    pub selections: BTreeSet<String>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Deserialize)]
pub struct FavoriteRequest {
    pub item: ItemId,
}

#[derive(Deserialize)]
pub struct AdmissionRequest {
    pub closed: bool,
}

#[derive(Deserialize)]
pub struct ActiveRequest {
    pub active: bool,
}

#[derive(Deserialize)]
pub struct ProvisionRequest {
    pub name: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

#[derive(Deserialize)]
pub struct RoleRequest {
    pub role: Role,
}

fn default_role() -> Role {
    Role::User
}

#[derive(Serialize)]
pub struct MenuView {
    pub items: Vec<MenuItem>,
    pub vote: Option<VoteRecord>,
    pub closed: bool,
}

pub async fn me_handler(
    State(state): Shared,
    identity: Identity,
) -> Result<impl IntoResponse, AppError> {
    let caller = identity.require(Role::User)?;

    Ok(Json(state.roster.participant(caller.participant).await?))
}

pub async fn menu_handler(
    State(state): Shared,
    identity: Identity,
) -> Result<impl IntoResponse, AppError> {
    let caller = identity.require(Role::User)?;

    Ok(Json(MenuView {
        items: state.catalog.items(caller.role >= Role::Admin).await?,
        vote: state.ledger.current_vote(caller.participant).await?,
        closed: state.admission.status().await?.closed,
    }))
}

pub async fn tally_handler(
    State(state): Shared,
    identity: Identity,
) -> Result<impl IntoResponse, AppError> {
    identity.require(Role::User)?;

    Ok(Json(state.ledger.tally_snapshot().await?))
}

pub async fn status_handler(
    State(state): Shared,
    identity: Identity,
) -> Result<impl IntoResponse, AppError> {
    identity.require(Role::User)?;

    Ok(Json::<AdmissionState>(state.admission.status().await?))
}

pub async fn vote_handler(
    State(state): Shared,
    identity: Identity,
    body: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let caller = identity.require(Role::User)?;
    let request = payload(body)?;

    let record = state
        .ledger
        .cast_or_update(
            caller.participant,
            request.item,
            request.selections,
            request.notes,
        )
        .await?;

    Ok(Json(record))
}

pub async fn cancel_handler(
    State(state): Shared,
    identity: Identity,
) -> Result<impl IntoResponse, AppError> {
    let caller = identity.require(Role::User)?;
    state.ledger.cancel(caller.participant).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn favorites_handler(
    State(state): Shared,
    identity: Identity,
) -> Result<impl IntoResponse, AppError> {
    let caller = identity.require(Role::User)?;

    Ok(Json(state.favorites.list(caller.participant).await?))
}

pub async fn favorite_toggle_handler(
    State(state): Shared,
    identity: Identity,
    body: Result<Json<FavoriteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let caller = identity.require(Role::User)?;
    let request = payload(body)?;

    Ok(Json(
        state
            .favorites
            .toggle(caller.participant, request.item)
            .await?,
    ))
}

/// Server-sent change notifications, one topic per connection.
pub async fn events_handler(
    State(state): Shared,
    identity: Identity,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    identity.require(Role::User)?;

    let subscription = state.broadcaster.subscribe();
    let events = stream::unfold(subscription, |mut subscription| async move {
        let change = subscription.recv().await?;
        let event = Event::default()
            .event(change.kind())
            .json_data(change)
            .unwrap_or_else(|_| Event::default().event(change.kind()));

        Some((Ok(event), subscription))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

pub async fn orders_handler(
    State(state): Shared,
    identity: Identity,
) -> Result<impl IntoResponse, AppError> {
    identity.require(Role::Admin)?;

    Ok(Json(state.ledger.orders().await?))
}

pub async fn add_item_handler(
    State(state): Shared,
    identity: Identity,
    body: Result<Json<ItemDraft>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let caller = identity.require(Role::Admin)?;
    let draft = payload(body)?;

    Ok((
        StatusCode::CREATED,
        Json(state.catalog.add_item(&caller, draft).await?),
    ))
}

pub async fn edit_item_handler(
    State(state): Shared,
    identity: Identity,
    Path(id): Path<u64>,
    body: Result<Json<ItemDraft>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let caller = identity.require(Role::Admin)?;
    let draft = payload(body)?;

    Ok(Json(state.catalog.edit_item(&caller, ItemId(id), draft).await?))
}

pub async fn item_active_handler(
    State(state): Shared,
    identity: Identity,
    Path(id): Path<u64>,
    body: Result<Json<ActiveRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let caller = identity.require(Role::Admin)?;
    let request = payload(body)?;

    Ok(Json(
        state
            .catalog
            .set_active(&caller, ItemId(id), request.active)
            .await?,
    ))
}

pub async fn remove_item_handler(
    State(state): Shared,
    identity: Identity,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    let caller = identity.require(Role::Admin)?;
    state.catalog.remove_item(&caller, ItemId(id)).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_menu_handler(
    State(state): Shared,
    identity: Identity,
) -> Result<impl IntoResponse, AppError> {
    let caller = identity.require(Role::Superadmin)?;
    state.catalog.clear_menu(&caller).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn admission_handler(
    State(state): Shared,
    identity: Identity,
    body: Result<Json<AdmissionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let caller = identity.require(Role::Admin)?;
    let request = payload(body)?;
    state.admission.set_closed(&caller, request.closed).await?;

    Ok(Json(AdmissionState {
        closed: request.closed,
    }))
}

pub async fn reset_handler(
    State(state): Shared,
    identity: Identity,
) -> Result<impl IntoResponse, AppError> {
    let caller = identity.require(Role::Admin)?;
    state.admission.reset_cycle(&caller).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn participants_handler(
    State(state): Shared,
    identity: Identity,
) -> Result<impl IntoResponse, AppError> {
    identity.require(Role::User)?;

    Ok(Json(state.roster.list().await?))
}

pub async fn provision_handler(
    State(state): Shared,
    identity: Identity,
    body: Result<Json<ProvisionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let caller = identity.require(Role::Superadmin)?;
    let request = payload(body)?;

    Ok((
        StatusCode::CREATED,
        Json(
            state
                .roster
                .provision(&caller, &request.name, request.role)
                .await?,
        ),
    ))
}

pub async fn remove_participant_handler(
    State(state): Shared,
    identity: Identity,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    let caller = identity.require(Role::Superadmin)?;
    state.roster.remove(&caller, ParticipantId(id)).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn role_handler(
    State(state): Shared,
    identity: Identity,
    Path(id): Path<u64>,
    body: Result<Json<RoleRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let caller = identity.require(Role::Superadmin)?;
    let request = payload(body)?;

    Ok(Json(
        state
            .roster
            .set_role(&caller, ParticipantId(id), request.role)
            .await?,
    ))
}

pub async fn rotate_credentials_handler(
    State(state): Shared,
    identity: Identity,
) -> Result<impl IntoResponse, AppError> {
    let caller = identity.require(Role::User)?;

    Ok(Json(state.roster.rotate_credentials(&caller).await?))
}
