//! # Redis
//!
//! RAM database.
//!
//! Core purpose is to store and lookup participant votes and item tallies. Also, used for atomic
//! multi-row commits.
//!
//! ## Layout
//!
//! - `canteen:items`: hash, item id to item JSON (tally field ignored)
//! - `canteen:tallies`: hash, item id to 32-bit **tally** int
//! - `canteen:votes`: hash, participant id to vote record JSON
//! - `canteen:participants`: hash, participant id to participant JSON
//! - `canteen:favorites:{participant}`: set of item ids
//! - `canteen:fans:{item}`: set of participant ids, reverse of the above for cascades
//! - `canteen:admission`: `1` when closed
//! - `canteen:versions`: hash, [`Key`] name to version int
//! - `canteen:seq:{items,participants}`: id counters
//! - `canteen:events`: pub/sub channel, [`ChangeEvent`] JSON from other processes
//!
//! ## Implementation
//!
//! - Reads go through `MULTI`/`EXEC` pipelines so a value and its version come from the same instant
//! - Commits run one Lua script: validate every read version, then apply every write
//! - Redis runs scripts one at a time, so a commit is indivisible
//! - Write payloads are encoded to JSON on our side and stored verbatim, the script never re-encodes
//!
//! ## Events
//!
//! Sessions only hear the [`Broadcaster`] of the server they are connected to. Tools that commit
//! from their own process, like the menu loader, [`publish_event`] on `canteen:events` and the
//! server's [`run_event_relay`] re-publishes each event to its sessions.
use std::{
    collections::{BTreeSet, HashMap},
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use redis::{
    Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::{
    broadcast::{Broadcaster, ChangeEvent},
    model::{ItemId, MenuItem, Participant, ParticipantId, VoteRecord},
    store::{Key, Sequence, Store, StoreError, Versioned, Write},
};

const ITEMS: &str = "canteen:items";
const TALLIES: &str = "canteen:tallies";
const VOTES: &str = "canteen:votes";
const PARTICIPANTS: &str = "canteen:participants";
const ADMISSION: &str = "canteen:admission";
const VERSIONS: &str = "canteen:versions";
const FAVORITES_PREFIX: &str = "canteen:favorites:";
pub const EVENTS_CHANNEL: &str = "canteen:events";

const COMMIT_SCRIPT: &str = r#"
local versions = 'canteen:versions'

local function bump(key)
    redis.call('HINCRBY', versions, key, 1)
end

for _, read in ipairs(cjson.decode(ARGV[1])) do
    local current = tonumber(redis.call('HGET', versions, read[1]) or '0')
    if current ~= tonumber(read[2]) then
        return 0
    end
end

local function drop_votes(matching)
    local flat = redis.call('HGETALL', 'canteen:votes')
    for i = 1, #flat, 2 do
        if matching == nil or cjson.decode(flat[i + 1]).item == matching then
            redis.call('HDEL', 'canteen:votes', flat[i])
            bump('vote:' .. flat[i])
        end
    end
end

local function drop_fans(item)
    for _, participant in ipairs(redis.call('SMEMBERS', 'canteen:fans:' .. item)) do
        redis.call('SREM', 'canteen:favorites:' .. participant, item)
        bump('favorites:' .. participant)
    end
    redis.call('DEL', 'canteen:fans:' .. item)
end

for _, write in ipairs(cjson.decode(ARGV[2])) do
    local op = write[1]
    if op == 'put_vote' then
        redis.call('HSET', 'canteen:votes', write[2], write[3])
        bump('vote:' .. write[2])
    elseif op == 'delete_vote' then
        redis.call('HDEL', 'canteen:votes', write[2])
        bump('vote:' .. write[2])
    elseif op == 'adjust_tally' then
        if redis.call('HEXISTS', 'canteen:items', write[2]) == 1 then
            redis.call('HINCRBY', 'canteen:tallies', write[2], tonumber(write[3]))
        end
        bump('tally:' .. write[2])
    elseif op == 'set_closed' then
        redis.call('SET', 'canteen:admission', write[2])
        bump('admission')
    elseif op == 'reset_cycle' then
        drop_votes(nil)
        for _, item in ipairs(redis.call('HKEYS', 'canteen:tallies')) do
            redis.call('HSET', 'canteen:tallies', item, 0)
            bump('tally:' .. item)
        end
        redis.call('SET', 'canteen:admission', '0')
        bump('admission')
    elseif op == 'put_item' then
        redis.call('HSET', 'canteen:items', write[2], write[3])
        redis.call('HSETNX', 'canteen:tallies', write[2], 0)
        bump('item:' .. write[2])
    elseif op == 'delete_item' then
        drop_votes(tonumber(write[2]))
        drop_fans(write[2])
        redis.call('HDEL', 'canteen:items', write[2])
        redis.call('HDEL', 'canteen:tallies', write[2])
        bump('item:' .. write[2])
        bump('tally:' .. write[2])
    elseif op == 'clear_menu' then
        drop_votes(nil)
        for _, item in ipairs(redis.call('HKEYS', 'canteen:items')) do
            drop_fans(item)
            bump('item:' .. item)
            bump('tally:' .. item)
        end
        redis.call('DEL', 'canteen:items', 'canteen:tallies')
        redis.call('SET', 'canteen:admission', '0')
        bump('admission')
    elseif op == 'add_favorite' then
        redis.call('SADD', 'canteen:favorites:' .. write[2], write[3])
        redis.call('SADD', 'canteen:fans:' .. write[3], write[2])
        bump('favorites:' .. write[2])
    elseif op == 'remove_favorite' then
        redis.call('SREM', 'canteen:favorites:' .. write[2], write[3])
        redis.call('SREM', 'canteen:fans:' .. write[3], write[2])
        bump('favorites:' .. write[2])
    elseif op == 'put_participant' then
        redis.call('HSET', 'canteen:participants', write[2], write[3])
        bump('participant:' .. write[2])
        bump('roster')
    elseif op == 'delete_participant' then
        for _, item in ipairs(redis.call('SMEMBERS', 'canteen:favorites:' .. write[2])) do
            redis.call('SREM', 'canteen:fans:' .. item, write[2])
        end
        redis.call('DEL', 'canteen:favorites:' .. write[2])
        redis.call('HDEL', 'canteen:participants', write[2])
        bump('favorites:' .. write[2])
        bump('participant:' .. write[2])
        bump('roster')
    else
        return redis.error_reply('unknown op ' .. tostring(op))
    end
end

return 1
"#;

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, StoreError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url)?;
    let connection_manager = client.get_connection_manager_with_config(config).await?;

    Ok(connection_manager)
}

pub struct RedisStore {
    connection: ConnectionManager,
    commit_script: Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        Ok(Self::new(init_redis(redis_url).await?))
    }

    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            commit_script: Script::new(COMMIT_SCRIPT),
        }
    }

    async fn hash_row<T: DeserializeOwned>(
        &self,
        hash: &str,
        field: String,
        key: Key,
    ) -> Result<Versioned<Option<T>>, StoreError> {
        let mut con = self.connection.clone();
        let (raw, version): (Option<String>, Option<u64>) = redis::pipe()
            .atomic()
            .hget(hash, &field)
            .hget(VERSIONS, key.to_string())
            .query_async(&mut con)
            .await?;

        let value = raw.map(|json| serde_json::from_str(&json)).transpose()?;

        Ok(Versioned {
            key,
            version: version.unwrap_or(0),
            value,
        })
    }
}

fn decode_rows<T: DeserializeOwned>(rows: HashMap<String, String>) -> Result<Vec<T>, StoreError> {
    rows.into_values()
        .map(|json| serde_json::from_str(&json).map_err(StoreError::from))
        .collect()
}

fn encode(write: &Write) -> Result<Vec<String>, StoreError> {
    let op = |name: &str, args: Vec<String>| {
        let mut encoded = vec![name.to_string()];
        encoded.extend(args);
        encoded
    };

    Ok(match write {
        Write::PutVote(record) => op(
            "put_vote",
            vec![record.participant.to_string(), serde_json::to_string(record)?],
        ),
        Write::DeleteVote(participant) => op("delete_vote", vec![participant.to_string()]),
        Write::AdjustTally { item, delta } => {
            op("adjust_tally", vec![item.to_string(), delta.to_string()])
        }
        Write::SetClosed(closed) => op("set_closed", vec![u8::from(*closed).to_string()]),
        Write::ResetCycle => op("reset_cycle", vec![]),
        Write::PutItem(item) => op(
            "put_item",
            vec![item.id.to_string(), serde_json::to_string(item)?],
        ),
        Write::DeleteItem(item) => op("delete_item", vec![item.to_string()]),
        Write::ClearMenu => op("clear_menu", vec![]),
        Write::AddFavorite { participant, item } => op(
            "add_favorite",
            vec![participant.to_string(), item.to_string()],
        ),
        Write::RemoveFavorite { participant, item } => op(
            "remove_favorite",
            vec![participant.to_string(), item.to_string()],
        ),
        Write::PutParticipant(participant) => op(
            "put_participant",
            vec![participant.id.to_string(), serde_json::to_string(participant)?],
        ),
        Write::DeleteParticipant(participant) => {
            op("delete_participant", vec![participant.to_string()])
        }
    })
}

#[async_trait]
impl Store for RedisStore {
    async fn admission(&self) -> Result<Versioned<bool>, StoreError> {
        let mut con = self.connection.clone();
        let (closed, version): (Option<u8>, Option<u64>) = redis::pipe()
            .atomic()
            .get(ADMISSION)
            .hget(VERSIONS, Key::Admission.to_string())
            .query_async(&mut con)
            .await?;

        Ok(Versioned {
            key: Key::Admission,
            version: version.unwrap_or(0),
            value: closed == Some(1),
        })
    }

    async fn item(&self, id: ItemId) -> Result<Versioned<Option<MenuItem>>, StoreError> {
        let mut con = self.connection.clone();
        let key = Key::Item(id);
        let (raw, tally, version): (Option<String>, Option<u32>, Option<u64>) = redis::pipe()
            .atomic()
            .hget(ITEMS, id.0)
            .hget(TALLIES, id.0)
            .hget(VERSIONS, key.to_string())
            .query_async(&mut con)
            .await?;

        let value = raw
            .map(|json| serde_json::from_str::<MenuItem>(&json))
            .transpose()?
            .map(|item| MenuItem {
                tally: tally.unwrap_or(0),
                ..item
            });

        Ok(Versioned {
            key,
            version: version.unwrap_or(0),
            value,
        })
    }

    async fn items(&self) -> Result<Vec<MenuItem>, StoreError> {
        let mut con = self.connection.clone();
        let (rows, tallies): (HashMap<String, String>, HashMap<u64, u32>) = redis::pipe()
            .atomic()
            .hgetall(ITEMS)
            .hgetall(TALLIES)
            .query_async(&mut con)
            .await?;

        let mut items: Vec<MenuItem> = decode_rows(rows)?;
        for item in items.iter_mut() {
            item.tally = tallies.get(&item.id.0).copied().unwrap_or(0);
        }
        items.sort_by_key(|item| item.id);

        Ok(items)
    }

    async fn vote(
        &self,
        participant: ParticipantId,
    ) -> Result<Versioned<Option<VoteRecord>>, StoreError> {
        self.hash_row(VOTES, participant.to_string(), Key::Vote(participant))
            .await
    }

    async fn votes(&self) -> Result<Vec<VoteRecord>, StoreError> {
        let mut con = self.connection.clone();
        let rows: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(VOTES)
            .query_async(&mut con)
            .await?;

        let mut votes: Vec<VoteRecord> = decode_rows(rows)?;
        votes.sort_by_key(|vote| vote.participant);

        Ok(votes)
    }

    async fn favorites(
        &self,
        participant: ParticipantId,
    ) -> Result<Versioned<BTreeSet<ItemId>>, StoreError> {
        let mut con = self.connection.clone();
        let key = Key::Favorites(participant);
        let (members, version): (Vec<u64>, Option<u64>) = redis::pipe()
            .atomic()
            .smembers(format!("{FAVORITES_PREFIX}{participant}"))
            .hget(VERSIONS, key.to_string())
            .query_async(&mut con)
            .await?;

        Ok(Versioned {
            key,
            version: version.unwrap_or(0),
            value: members.into_iter().map(ItemId).collect(),
        })
    }

    async fn participant(
        &self,
        id: ParticipantId,
    ) -> Result<Versioned<Option<Participant>>, StoreError> {
        self.hash_row(PARTICIPANTS, id.to_string(), Key::Participant(id))
            .await
    }

    async fn participants(&self) -> Result<Versioned<Vec<Participant>>, StoreError> {
        let mut con = self.connection.clone();
        let (rows, version): (HashMap<String, String>, Option<u64>) = redis::pipe()
            .atomic()
            .hgetall(PARTICIPANTS)
            .hget(VERSIONS, Key::Roster.to_string())
            .query_async(&mut con)
            .await?;

        let mut participants: Vec<Participant> = decode_rows(rows)?;
        participants.sort_by_key(|p| p.id);

        Ok(Versioned {
            key: Key::Roster,
            version: version.unwrap_or(0),
            value: participants,
        })
    }

    async fn next_id(&self, sequence: Sequence) -> Result<u64, StoreError> {
        let mut con = self.connection.clone();
        let counter = match sequence {
            Sequence::Items => "canteen:seq:items",
            Sequence::Participants => "canteen:seq:participants",
        };

        let id: u64 = redis::cmd("INCR").arg(counter).query_async(&mut con).await?;
        Ok(id)
    }

    async fn commit(&self, reads: &[(Key, u64)], writes: &[Write]) -> Result<(), StoreError> {
        let reads: Vec<(String, u64)> = reads
            .iter()
            .map(|(key, version)| (key.to_string(), *version))
            .collect();
        let writes = writes.iter().map(encode).collect::<Result<Vec<_>, _>>()?;

        let mut con = self.connection.clone();
        let applied: i64 = self
            .commit_script
            .arg(serde_json::to_string(&reads)?)
            .arg(serde_json::to_string(&writes)?)
            .invoke_async(&mut con)
            .await?;

        match applied {
            1 => Ok(()),
            0 => {
                debug!("Redis commit rejected, read set moved");
                Err(StoreError::Conflict)
            }
            other => Err(StoreError::Script(format!("unexpected commit reply {other}"))),
        }
    }
}

/// Sends `event` to every relaying server. Returns how many subscribers got it.
pub async fn publish_event(
    connection: &mut ConnectionManager,
    event: ChangeEvent,
) -> Result<usize, StoreError> {
    let receivers: usize = redis::cmd("PUBLISH")
        .arg(EVENTS_CHANNEL)
        .arg(serde_json::to_string(&event)?)
        .query_async(connection)
        .await?;

    Ok(receivers)
}

/// Re-publishes events from `canteen:events` to local sessions until the subscription drops.
pub async fn relay_events(redis_url: &str, broadcaster: &Broadcaster) -> Result<(), StoreError> {
    let client = Client::open(redis_url)?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(EVENTS_CHANNEL).await?;
    info!("Relaying events from {EVENTS_CHANNEL}");

    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        let payload: String = message.get_payload()?;

        match serde_json::from_str::<ChangeEvent>(&payload) {
            Ok(event) => {
                broadcaster.publish(event);
            }
            Err(e) => warn!("Ignoring malformed event {payload}: {e}"),
        }
    }

    Ok(())
}

/// [`relay_events`], resubscribing after a second whenever the connection drops.
pub async fn run_event_relay(redis_url: String, broadcaster: Broadcaster) {
    loop {
        match relay_events(&redis_url, &broadcaster).await {
            Ok(()) => warn!("Event relay closed, resubscribing"),
            Err(e) => warn!("Event relay failed, resubscribing: {e}"),
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
