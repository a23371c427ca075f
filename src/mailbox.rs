//! Disposable address issuance and the client-facing mailbox operations.

use std::sync::Arc;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::display::{display_body, display_sender, extract_text_preview};
use crate::error::{DatabaseError, MailboxError};
use crate::mime::fix_mojibake;
use crate::store::{Database, InboxMessage, MailboxRecord, MessageRecord};

const FIRST_NAMES: &[&str] = &[
    "adi", "budi", "citra", "dewi", "eka", "fajar", "gilang", "hana", "irfan", "joko", "kiki",
    "lina", "made", "nina", "oka", "putu", "alex", "brian", "chris", "david", "emma", "frank",
    "george", "henry", "jack", "kate", "luke", "mike", "nick", "olivia", "peter", "ryan", "anna",
    "felix", "hans", "ingrid", "klaus", "lars", "maria", "nicolas", "olga", "pierre", "rosa",
    "stefan", "theo", "viktor", "elena", "marco", "akira", "haruto", "hinata", "kaito", "kenji",
    "mei", "naomi", "ren", "riku", "sakura", "sora", "takeshi", "yuki", "yuto", "aoi", "jimin",
    "jisoo", "minho", "seojun", "siwoo", "eunji", "haeun", "jiwoo", "chen", "fang", "hui", "jing",
    "lei", "lin", "ming", "peng", "wei", "xiao",
];

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of a generated owner token.
pub const OWNER_TOKEN_LEN: usize = 22;

/// Random addresses tried before giving up on a collision streak.
const CREATE_ATTEMPTS: usize = 5;

fn base36(rng: &mut impl Rng, len: usize) -> String {
    (0..len)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

/// `<first-name><4 base36 chars><0..999>@domain`.
pub fn generate_address(domain: &str, rng: &mut impl Rng) -> String {
    let name = FIRST_NAMES.choose(rng).copied().unwrap_or("user");
    let tag = base36(rng, 4);
    let num: u32 = rng.gen_range(0..999);
    format!("{name}{tag}{num}@{domain}")
}

/// A fresh session token shared by the mailboxes of one client.
pub fn generate_owner_token(rng: &mut impl Rng) -> String {
    base36(rng, OWNER_TOKEN_LEN)
}

/// Lower-case and keep only `[a-z0-9]`.
pub fn sanitize_username(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// The requested domain if it is available, otherwise the first available one.
pub fn select_domain<'a>(requested: Option<&str>, available: &'a [String]) -> Option<&'a str> {
    requested
        .and_then(|r| available.iter().find(|d| d.eq_ignore_ascii_case(r.trim())))
        .or_else(|| available.first())
        .map(String::as_str)
}

/// Result of creating a new session.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedMailbox {
    pub id: Uuid,
    pub email: String,
    pub session_token: String,
}

/// Inbox query scope.
#[derive(Debug, Clone)]
pub enum InboxScope {
    Address(String),
    Owner(String),
}

/// A message as shown in an inbox listing.
#[derive(Debug, Clone, Serialize)]
pub struct InboxItem {
    #[serde(flatten)]
    pub message: MessageRecord,
    pub recipient_email: String,
    pub sender: String,
    pub display_subject: String,
    pub preview: String,
    pub display_body: String,
}

impl From<InboxMessage> for InboxItem {
    fn from(entry: InboxMessage) -> Self {
        let msg = entry.message;
        let html = msg.body_html.as_deref();
        let text = msg.body_text.as_deref();
        Self {
            recipient_email: entry.recipient,
            sender: display_sender(msg.from_name.as_deref(), &msg.from_address),
            display_subject: fix_mojibake(&msg.subject),
            preview: extract_text_preview(html, text),
            display_body: display_body(html, text),
            message: msg,
        }
    }
}

/// Mailbox operations over the store.
#[derive(Clone)]
pub struct MailboxService {
    db: Arc<dyn Database>,
    fallback_domains: Vec<String>,
}

impl MailboxService {
    /// `fallback_domains` is used while the domains table is empty.
    pub fn new(db: Arc<dyn Database>, fallback_domains: Vec<String>) -> Self {
        Self {
            db,
            fallback_domains,
        }
    }

    /// Registered domains, or the fallback list when none are registered.
    pub async fn available_domains(&self) -> Result<Vec<String>, MailboxError> {
        let domains = self.db.list_domains().await?;
        if domains.is_empty() {
            Ok(self.fallback_domains.clone())
        } else {
            Ok(domains)
        }
    }

    async fn pick_domain(&self, requested: Option<&str>) -> Result<String, MailboxError> {
        let domains = self.available_domains().await?;
        select_domain(requested, &domains)
            .map(str::to_string)
            .ok_or(MailboxError::NoDomains)
    }

    /// Start a new session with one random address.
    pub async fn create(&self, domain: Option<&str>) -> Result<CreatedMailbox, MailboxError> {
        let domain = self.pick_domain(domain).await?;
        let owner_token = generate_owner_token(&mut rand::thread_rng());

        for _ in 0..CREATE_ATTEMPTS {
            let address = generate_address(&domain, &mut rand::thread_rng());
            match self.db.create_mailbox(&address, &owner_token, false).await {
                Ok(mailbox) => {
                    info!(mailbox_id = %mailbox.id, address = %mailbox.address, "Mailbox created");
                    return Ok(CreatedMailbox {
                        id: mailbox.id,
                        email: mailbox.address,
                        session_token: owner_token,
                    });
                }
                Err(DatabaseError::Constraint(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(MailboxError::AddressTaken(format!("random address on {domain}")))
    }

    /// Add an address to an existing session, random or from `username`.
    pub async fn add(
        &self,
        owner_token: &str,
        domain: Option<&str>,
        username: Option<&str>,
    ) -> Result<MailboxRecord, MailboxError> {
        self.insert_address(owner_token, domain, username, false)
            .await
    }

    /// Issue a protected address: kept by the retention sweep and refused by
    /// session delete. Joins `owner_token`'s session when given, else starts
    /// a new one.
    pub async fn create_protected(
        &self,
        owner_token: Option<&str>,
        domain: Option<&str>,
        username: Option<&str>,
    ) -> Result<CreatedMailbox, MailboxError> {
        let owner_token = match owner_token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => token.to_string(),
            None => generate_owner_token(&mut rand::thread_rng()),
        };
        let mailbox = self
            .insert_address(&owner_token, domain, username, true)
            .await?;
        info!(mailbox_id = %mailbox.id, address = %mailbox.address, "Protected mailbox created");
        Ok(CreatedMailbox {
            id: mailbox.id,
            email: mailbox.address,
            session_token: owner_token,
        })
    }

    async fn insert_address(
        &self,
        owner_token: &str,
        domain: Option<&str>,
        username: Option<&str>,
        is_protected: bool,
    ) -> Result<MailboxRecord, MailboxError> {
        let domain = self.pick_domain(domain).await?;

        let address = match username {
            Some(name) => {
                let local = sanitize_username(name);
                if local.is_empty() {
                    return Err(MailboxError::InvalidRequest(
                        "username must contain letters or digits".into(),
                    ));
                }
                format!("{local}@{domain}")
            }
            None => generate_address(&domain, &mut rand::thread_rng()),
        };

        if self.db.get_mailbox_by_address(&address).await?.is_some() {
            return Err(MailboxError::AddressTaken(address));
        }

        match self
            .db
            .create_mailbox(&address, owner_token, is_protected)
            .await
        {
            Ok(mailbox) => Ok(mailbox),
            Err(DatabaseError::Constraint(_)) => Err(MailboxError::AddressTaken(address)),
            Err(e) => Err(e.into()),
        }
    }

    /// The session's first mailbox.
    pub async fn get(&self, owner_token: &str) -> Result<MailboxRecord, MailboxError> {
        self.db
            .list_mailboxes_by_owner(owner_token)
            .await?
            .into_iter()
            .next()
            .ok_or(MailboxError::NotFound)
    }

    /// Messages newest first, formatted for display.
    pub async fn inbox(&self, scope: &InboxScope) -> Result<Vec<InboxItem>, MailboxError> {
        let entries = match scope {
            InboxScope::Address(address) => self.db.list_inbox_by_address(address).await?,
            InboxScope::Owner(token) => self.db.list_inbox_by_owner(token).await?,
        };
        Ok(entries.into_iter().map(InboxItem::from).collect())
    }

    /// Delete every mailbox of a session. Protected sessions are refused.
    pub async fn delete(&self, owner_token: &str) -> Result<usize, MailboxError> {
        let mailboxes = self.db.list_mailboxes_by_owner(owner_token).await?;
        if mailboxes.iter().any(|m| m.is_protected) {
            return Err(MailboxError::Protected);
        }
        if mailboxes.is_empty() {
            return Err(MailboxError::NotFound);
        }

        let removed = self.db.delete_mailboxes_by_owner(owner_token).await?;
        info!(removed, "Session mailboxes deleted");
        Ok(removed)
    }

    pub async fn mark_read(&self, owner_token: &str, id: Uuid) -> Result<(), MailboxError> {
        if self.db.mark_owned_message_read(owner_token, id).await? {
            Ok(())
        } else {
            Err(MailboxError::NotFound)
        }
    }

    pub async fn delete_message(&self, owner_token: &str, id: Uuid) -> Result<(), MailboxError> {
        if self.db.delete_owned_message(owner_token, id).await? {
            Ok(())
        } else {
            Err(MailboxError::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LibSqlBackend, NewMessage};
    use chrono::Utc;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    async fn service(fallback: &[&str]) -> (Arc<dyn Database>, MailboxService) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let fallback = fallback.iter().map(|d| d.to_string()).collect();
        (db.clone(), MailboxService::new(db, fallback))
    }

    // ── pure helpers ────────────────────────────────────────────

    #[test]
    fn generated_address_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let address = generate_address("temp.test", &mut rng);
            let (local, domain) = address.split_once('@').unwrap();
            assert_eq!(domain, "temp.test");
            assert!(FIRST_NAMES.iter().any(|n| local.starts_with(n)), "local part: {local}");
            assert!(local.ends_with(|c: char| c.is_ascii_digit()), "local part: {local}");
            assert!(local.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn owner_token_is_base36() {
        let token = generate_owner_token(&mut StdRng::seed_from_u64(1));
        assert_eq!(token.len(), OWNER_TOKEN_LEN);
        assert!(token.bytes().all(|b| BASE36.contains(&b)));
    }

    #[test]
    fn username_sanitizing() {
        assert_eq!(sanitize_username("John.Doe-99!"), "johndoe99");
        assert_eq!(sanitize_username("Ünïcode"), "ncode");
        assert_eq!(sanitize_username("..."), "");
    }

    #[test]
    fn domain_selection() {
        let available = vec!["a.test".to_string(), "b.test".to_string()];
        assert_eq!(select_domain(Some("b.test"), &available), Some("b.test"));
        assert_eq!(select_domain(Some("evil.test"), &available), Some("a.test"));
        assert_eq!(select_domain(None, &available), Some("a.test"));
        assert_eq!(select_domain(None, &[]), None);
    }

    // ── service ─────────────────────────────────────────────────

    #[tokio::test]
    async fn create_uses_fallback_domains() {
        let (_db, svc) = service(&["fallback.test"]).await;
        let created = svc.create(None).await.unwrap();
        assert!(created.email.ends_with("@fallback.test"));
        assert_eq!(created.session_token.len(), OWNER_TOKEN_LEN);
    }

    #[tokio::test]
    async fn registered_domains_replace_fallback() {
        let (db, svc) = service(&["fallback.test"]).await;
        db.add_domain("real.test").await.unwrap();
        assert_eq!(svc.available_domains().await.unwrap(), vec!["real.test"]);
        let created = svc.create(Some("fallback.test")).await.unwrap();
        assert!(created.email.ends_with("@real.test"));
    }

    #[tokio::test]
    async fn protected_mailbox_survives_session_delete() {
        let (db, svc) = service(&["temp.test"]).await;
        let created = svc
            .create_protected(None, None, Some("Support"))
            .await
            .unwrap();
        assert_eq!(created.email, "support@temp.test");

        let record = db.get_mailbox_by_address("support@temp.test").await.unwrap().unwrap();
        assert!(record.is_protected);
        assert!(matches!(
            svc.delete(&created.session_token).await,
            Err(MailboxError::Protected)
        ));

        let joined = svc
            .create_protected(Some(&created.session_token), None, None)
            .await
            .unwrap();
        assert_eq!(joined.session_token, created.session_token);
        assert_eq!(db.count_protected_mailboxes().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn no_domains_is_an_error() {
        let (_db, svc) = service(&[]).await;
        assert!(matches!(svc.create(None).await, Err(MailboxError::NoDomains)));
    }

    #[tokio::test]
    async fn add_with_username_and_collision() {
        let (_db, svc) = service(&["t.test"]).await;
        let created = svc.create(None).await.unwrap();
        let added = svc
            .add(&created.session_token, None, Some("My.Name"))
            .await
            .unwrap();
        assert_eq!(added.address, "myname@t.test");

        let again = svc.add("someone-else", None, Some("myname")).await;
        assert!(matches!(again, Err(MailboxError::AddressTaken(_))));

        let bad = svc.add(&created.session_token, None, Some("!!")).await;
        assert!(matches!(bad, Err(MailboxError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn get_returns_first_mailbox() {
        let (_db, svc) = service(&["t.test"]).await;
        let created = svc.create(None).await.unwrap();
        svc.add(&created.session_token, None, Some("second")).await.unwrap();
        assert_eq!(svc.get(&created.session_token).await.unwrap().address, created.email);
        assert!(matches!(svc.get("missing").await, Err(MailboxError::NotFound)));
    }

    #[tokio::test]
    async fn inbox_items_are_formatted() {
        let (db, svc) = service(&["t.test"]).await;
        let created = svc.create(None).await.unwrap();
        db.insert_message(&NewMessage {
            mailbox_id: created.id,
            from_address: "a@x.test".into(),
            from_name: Some("Alice".into()),
            subject: "CafÃ©".into(),
            body_text: None,
            body_html: Some("<p>Hello   <b>there</b></p>".into()),
            attachments: Vec::new(),
            message_id: None,
            received_at: Utc::now(),
        })
        .await
        .unwrap();

        let items = svc
            .inbox(&InboxScope::Owner(created.session_token.clone()))
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].recipient_email, created.email);
        assert_eq!(items[0].sender, "Alice <a@x.test>");
        assert_eq!(items[0].display_subject, "Café");
        assert_eq!(items[0].preview, "Hello there");
        assert_eq!(items[0].display_body, "<p>Hello <b>there</b></p>");

        let json = serde_json::to_value(&items[0]).unwrap();
        assert_eq!(json["recipient_email"], created.email.as_str());
        assert_eq!(json["subject"], "CafÃ©");

        let by_address = svc.inbox(&InboxScope::Address(created.email.clone())).await.unwrap();
        assert_eq!(by_address.len(), 1);
        let unknown = svc.inbox(&InboxScope::Address("no@t.test".into())).await.unwrap();
        assert!(unknown.is_empty());
    }

    #[tokio::test]
    async fn delete_refuses_protected_sessions() {
        let (db, svc) = service(&["t.test"]).await;
        db.create_mailbox("vip@t.test", "vip-token", true).await.unwrap();
        assert!(matches!(svc.delete("vip-token").await, Err(MailboxError::Protected)));
        assert!(matches!(svc.delete("nobody").await, Err(MailboxError::NotFound)));

        let created = svc.create(None).await.unwrap();
        assert_eq!(svc.delete(&created.session_token).await.unwrap(), 1);
        assert_eq!(db.count_mailboxes().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn message_actions_require_ownership() {
        let (db, svc) = service(&["t.test"]).await;
        let created = svc.create(None).await.unwrap();
        let msg = db
            .insert_message(&NewMessage {
                mailbox_id: created.id,
                from_address: "a@x.test".into(),
                from_name: None,
                subject: "s".into(),
                body_text: Some("t".into()),
                body_html: None,
                attachments: Vec::new(),
                message_id: None,
                received_at: Utc::now(),
            })
            .await
            .unwrap();

        assert!(matches!(svc.mark_read("other", msg.id).await, Err(MailboxError::NotFound)));
        svc.mark_read(&created.session_token, msg.id).await.unwrap();
        svc.delete_message(&created.session_token, msg.id).await.unwrap();
        assert!(matches!(
            svc.delete_message(&created.session_token, msg.id).await,
            Err(MailboxError::NotFound)
        ));
    }
}
