//! Persisted viewer identity, so a restart keeps the signed-in user.

use anyhow::Result;
use splitdebt_core::models::User;
use splitdebt_core::session::Session;

const DEFAULT_PATH: &str = ".splitdebt_session";
const TREE: &str = "session";
const USER_KEY: &[u8] = b"user";

pub struct SessionStore {
    db: sled::Db,
}

impl SessionStore {
    pub fn open_default() -> Result<Self> {
        Self::open(DEFAULT_PATH)
    }

    pub fn open(path: &str) -> Result<Self> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    /// In-memory store that disappears on drop.
    pub fn temporary() -> Result<Self> {
        Ok(Self {
            db: sled::Config::new().temporary(true).open()?,
        })
    }

    fn tree(&self) -> Result<sled::Tree> {
        Ok(self.db.open_tree(TREE)?)
    }

    pub fn save_user(&self, user: &User) -> Result<()> {
        let tree = self.tree()?;
        tree.insert(USER_KEY, serde_json::to_vec(user)?)?;
        tree.flush()?;
        tracing::info!(user_id = %user.id, "session saved");
        Ok(())
    }

    /// The stored session; anonymous when nothing (valid) was stored.
    pub fn load_session(&self) -> Result<Session> {
        let raw = self.tree()?.get(USER_KEY)?;
        Ok(Session::from_stored_record(raw.as_deref()))
    }

    /// Persists `user` and returns the session that starts with them.
    pub fn begin(&self, user: User) -> Result<Session> {
        self.save_user(&user)?;
        let mut session = Session::anonymous();
        session.begin(user);
        Ok(session)
    }

    /// Ends the stored session, if any, and forgets it.
    pub fn end(&self) -> Result<()> {
        let mut session = self.load_session()?;
        self.clear()?;
        session.end();
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let tree = self.tree()?;
        tree.remove(USER_KEY)?;
        tree.flush()?;
        Ok(())
    }
}
