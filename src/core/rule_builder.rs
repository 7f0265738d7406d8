//! Conversational rule builder
//!
//! A session collects rule context (genres, ratings, a year range, title
//! keywords) from a chat with the AI collaborator and finally compiles it into
//! a persisted [`Rule`].
//!
//! Session lifecycle: `Created -> Active -> Ready -> {Compiled, Expired}`.
//! Sessions live only in memory. Each one sits behind its own async mutex, so a
//! session has a single writer at a time; the TTL sweep skips sessions that are
//! currently locked. Lookups enforce the TTL too, so an idle session is
//! unreachable as soon as it expires even if the sweep has not run yet.

use crate::core::chat::{ChatClient, ChatMessage};
use crate::core::clock::Clock;
use crate::core::error::{CuratorError, Result};
use crate::core::rule_engine::{is_one_of, Criterion, NewRule, Operator, RuleEngine};
use crate::db::models::Rule;
use crate::db::repository::{LibraryRepository, Repository};
use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Trailing marker the assistant appends once the rule is complete
pub const READY_MARKER: &str = "[READY]";
pub const GENERATED_BY: &str = "rule_builder";

/// Keyword -> canonical genre name
const GENRE_VOCABULARY: &[(&str, &str)] = &[
    ("action", "Action"),
    ("adventure", "Adventure"),
    ("animation", "Animation"),
    ("animated", "Animation"),
    ("anime", "Anime"),
    ("comedy", "Comedy"),
    ("comedies", "Comedy"),
    ("crime", "Crime"),
    ("documentary", "Documentary"),
    ("documentaries", "Documentary"),
    ("drama", "Drama"),
    ("family", "Family"),
    ("fantasy", "Fantasy"),
    ("history", "History"),
    ("horror", "Horror"),
    ("music", "Music"),
    ("mystery", "Mystery"),
    ("romance", "Romance"),
    ("romantic", "Romance"),
    ("science fiction", "Science Fiction"),
    ("sci-fi", "Science Fiction"),
    ("thriller", "Thriller"),
    ("war", "War"),
    ("western", "Western"),
];

lazy_static! {
    static ref RATING_RE: Regex =
        Regex::new(r"\b(TV-Y7|TV-Y|TV-G|TV-PG|TV-14|TV-MA|NC-17|PG-13|PG|G|R)\b").unwrap();
    static ref YEAR_RANGE_RE: Regex =
        Regex::new(r"\b((?:19|20)\d{2})\s*(?:-|to|and|through)\s*((?:19|20)\d{2})\b").unwrap();
    static ref DECADE_RE: Regex = Regex::new(r"\b(19|20)?([0-9])0'?s\b").unwrap();
    static ref AFTER_RE: Regex =
        Regex::new(r"(?i)\b(after|since|newer than)\s+((?:19|20)\d{2})\b").unwrap();
    static ref BEFORE_RE: Regex =
        Regex::new(r"(?i)\b(before|until|older than)\s+((?:19|20)\d{2})\b").unwrap();
    static ref QUOTED_RE: Regex = Regex::new(r#""([^"]{2,})""#).unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Active,
    Ready,
    Compiled,
    Expired,
}

impl SessionState {
    fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Compiled | SessionState::Expired)
    }
}

/// Partial rule accumulated over the conversation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleContext {
    pub genres: Vec<String>,
    pub ratings: Vec<String>,
    pub year_min: Option<i64>,
    pub year_max: Option<i64>,
    pub keywords: Vec<String>,
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v.eq_ignore_ascii_case(value)) {
        list.push(value.to_string());
    }
}

fn year(s: &str) -> Option<i64> {
    s.parse().ok()
}

impl RuleContext {
    pub fn is_empty(&self) -> bool {
        self.genres.is_empty()
            && self.ratings.is_empty()
            && self.year_min.is_none()
            && self.year_max.is_none()
            && self.keywords.is_empty()
    }

    /// Keyword and pattern scan; a heuristic, not language understanding
    pub fn absorb(&mut self, text: &str) {
        let lower = text.to_lowercase();
        for (keyword, genre) in GENRE_VOCABULARY {
            let hit = lower
                .match_indices(keyword)
                .any(|(at, _)| is_word_at(&lower, at, keyword.len()));
            if hit {
                push_unique(&mut self.genres, genre);
            }
        }

        for m in RATING_RE.find_iter(text) {
            push_unique(&mut self.ratings, m.as_str());
        }

        if let Some(caps) = YEAR_RANGE_RE.captures(text) {
            if let (Some(a), Some(b)) = (year(&caps[1]), year(&caps[2])) {
                self.year_min = Some(a.min(b));
                self.year_max = Some(a.max(b));
            }
        } else if let Some(caps) = DECADE_RE.captures(text) {
            let digit: i64 = caps[2].parse().unwrap_or(0);
            let century = match caps.get(1).map(|c| c.as_str()) {
                Some("19") => 1900,
                Some(_) => 2000,
                None if digit >= 3 => 1900,
                None => 2000,
            };
            self.year_min = Some(century + digit * 10);
            self.year_max = Some(century + digit * 10 + 9);
        }

        if let Some(caps) = AFTER_RE.captures(text) {
            if let Some(y) = year(&caps[2]) {
                let inclusive = caps[1].eq_ignore_ascii_case("since");
                self.year_min = Some(if inclusive { y } else { y + 1 });
            }
        }
        if let Some(caps) = BEFORE_RE.captures(text) {
            if let Some(y) = year(&caps[2]) {
                let inclusive = caps[1].eq_ignore_ascii_case("until");
                self.year_max = Some(if inclusive { y } else { y - 1 });
            }
        }

        for caps in QUOTED_RE.captures_iter(text) {
            let keyword = caps[1].trim();
            if !keyword.is_empty() {
                push_unique(&mut self.keywords, keyword);
            }
        }
    }

    pub fn to_criteria(&self) -> Vec<Criterion> {
        let mut criteria = Vec::new();
        if !self.genres.is_empty() {
            criteria.push(is_one_of("genres", &self.genres));
        }
        if !self.ratings.is_empty() {
            criteria.push(is_one_of("content_rating", &self.ratings));
        }
        if self.year_min.is_some() || self.year_max.is_some() {
            criteria.push(Criterion::new(
                "year",
                Operator::Between,
                json!({"min": self.year_min, "max": self.year_max}),
            ));
        }
        if !self.keywords.is_empty() {
            criteria.push(Criterion::new(
                "title",
                Operator::Contains,
                json!(self.keywords),
            ));
        }
        criteria
    }
}

/// Whole-word occurrence of `len` bytes at `at`
fn is_word_at(text: &str, at: usize, len: usize) -> bool {
    let before = text[..at].chars().next_back();
    let after = text[at + len..].chars().next();
    let boundary = |c: Option<char>| c.map_or(true, |c| !c.is_alphanumeric());
    boundary(before) && boundary(after)
}

/// Split the ready marker off a reply
pub fn strip_ready_marker(reply: &str) -> (String, bool) {
    let trimmed = reply.trim_end();
    match trimmed.strip_suffix(READY_MARKER) {
        Some(rest) => (rest.trim_end().to_string(), true),
        None => (trimmed.to_string(), false),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub library_id: String,
    pub media_type: String,
    pub state: SessionState,
    pub messages: Vec<ChatMessage>,
    pub context: RuleContext,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_activity > ttl
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReply {
    pub reply: String,
    pub state: SessionState,
    pub context: RuleContext,
}

/// Keyed session store with one async mutex per session
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    async fn insert(&self, session: Session) {
        let id = session.id.clone();
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(session)));
    }

    /// Exclusive access to a live session
    async fn acquire(&self, id: &str) -> Result<OwnedMutexGuard<Session>> {
        let entry = self.sessions.read().await.get(id).cloned();
        let Some(entry) = entry else {
            return Err(session_not_found(id));
        };

        let mut guard = entry.lock_owned().await;
        if guard.state.is_terminal() {
            return Err(session_not_found(id));
        }
        if guard.is_expired(self.clock.now(), self.ttl) {
            guard.state = SessionState::Expired;
            drop(guard);
            self.sessions.write().await.remove(id);
            debug!(session_id = %id, "Session expired on access");
            return Err(session_not_found(id));
        }
        Ok(guard)
    }

    async fn remove(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }

    /// Drop idle sessions; sessions locked by a writer are left for the next pass
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| match entry.try_lock() {
            Ok(mut session) if session.is_expired(now, self.ttl) => {
                session.state = SessionState::Expired;
                false
            }
            _ => true,
        });
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn session_not_found(id: &str) -> CuratorError {
    CuratorError::NotFound(format!("Rule builder session {} not found", id))
}

pub struct RuleBuilder {
    store: SessionStore,
    chat: Arc<dyn ChatClient>,
    libraries: Arc<LibraryRepository>,
    rules: Arc<RuleEngine>,
    clock: Arc<dyn Clock>,
}

impl RuleBuilder {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        libraries: Arc<LibraryRepository>,
        rules: Arc<RuleEngine>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            store: SessionStore::new(ttl, clock.clone()),
            chat,
            libraries,
            rules,
            clock,
        }
    }

    pub async fn start_session(&self, library_id: &str, media_type: &str) -> Result<Session> {
        if self.libraries.find_by_id(library_id).await?.is_none() {
            return Err(CuratorError::NotFound(format!(
                "Library {} not found",
                library_id
            )));
        }

        let now = self.clock.now();
        let mut session = Session {
            id: Uuid::new_v4().to_string(),
            library_id: library_id.to_string(),
            media_type: media_type.to_string(),
            state: SessionState::Created,
            messages: Vec::new(),
            context: RuleContext::default(),
            created_at: now,
            last_activity: now,
        };
        session.messages.push(ChatMessage::assistant(format!(
            "Let's build a rule for your {} library. Which genres, ratings, release years or title keywords should it match?",
            media_type
        )));
        session.state = SessionState::Active;

        self.store.insert(session.clone()).await;
        info!(session_id = %session.id, library_id = %library_id, "Rule builder session started");
        Ok(session)
    }

    /// Snapshot of a live session; does not count as activity
    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        let guard = self.store.acquire(session_id).await?;
        Ok(guard.clone())
    }

    pub async fn process_message(&self, session_id: &str, text: &str) -> Result<MessageReply> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CuratorError::ValidationError(
                "Message must not be empty".to_string(),
            ));
        }

        let mut session = self.store.acquire(session_id).await?;
        let previous_activity = session.last_activity;
        session.messages.push(ChatMessage::user(text));
        session.last_activity = self.clock.now();

        let mut conversation = vec![ChatMessage::system(system_prompt(&session)?)];
        conversation.extend(session.messages.iter().cloned());

        let raw = match self.chat.chat(&conversation).await {
            Ok(reply) => reply,
            Err(e) => {
                // Keep the history retryable
                session.messages.pop();
                session.last_activity = previous_activity;
                warn!(session_id = %session_id, error = %e, "Rule builder chat failed");
                return Err(e);
            }
        };

        let (reply, ready) = strip_ready_marker(&raw);
        session.context.absorb(&format!("{}\n{}", text, reply));
        session.messages.push(ChatMessage::assistant(reply.clone()));
        session.last_activity = self.clock.now();
        if ready {
            session.state = SessionState::Ready;
        }

        Ok(MessageReply {
            reply,
            state: session.state,
            context: session.context.clone(),
        })
    }

    /// Compile the session's context into a persisted rule and close the session
    pub async fn generate_rule(&self, session_id: &str, name: &str) -> Result<Rule> {
        if name.trim().is_empty() {
            return Err(CuratorError::ValidationError(
                "Rule name must not be empty".to_string(),
            ));
        }

        let mut session = self.store.acquire(session_id).await?;
        if session.context.is_empty() {
            return Err(CuratorError::ValidationError(
                "Nothing to build a rule from yet".to_string(),
            ));
        }

        let rule = self
            .rules
            .create_rule(NewRule {
                library_id: session.library_id.clone(),
                name: name.trim().to_string(),
                criteria: session.context.to_criteria(),
                priority: 0,
                enabled: true,
                generated_by: Some(GENERATED_BY.to_string()),
            })
            .await?;

        session.state = SessionState::Compiled;
        drop(session);
        self.store.remove(session_id).await;

        info!(session_id = %session_id, rule_id = %rule.id, "Rule builder session compiled");
        Ok(rule)
    }

    pub async fn sweep(&self) -> usize {
        let removed = self.store.sweep().await;
        if removed > 0 {
            info!(removed, "Expired rule builder sessions");
        }
        removed
    }

    /// Periodic TTL sweep, independent of request traffic
    pub fn spawn_sweeper(self: Arc<Self>, every: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}

fn system_prompt(session: &Session) -> Result<String> {
    Ok(format!(
        "You help a user define a rule that routes {} requests to a media library. \
         Ask about genres, content ratings, release years and title keywords, one topic at a time. \
         Current rule context: {}. \
         When the user has confirmed the rule, end your reply with {}.",
        session.media_type,
        serde_json::to_string(&session.context)?,
        READY_MARKER
    ))
}
