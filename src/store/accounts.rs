use crate::db::{Condition, Document, Model, ModelBinder, Query, Sort};
use crate::error::{Error, Result};
use crate::model::LogicalDb;
use crate::schema::user::{
    AppliedCoupon, Cart, CartItem, DeviceInfo, Favorite, User, UserAddress, UserSession,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Users, addresses, sessions and carts on the admin database.
#[derive(Debug, Clone)]
pub struct AccountStore {
    pub users: Model<User>,
    pub addresses: Model<UserAddress>,
    pub sessions: Model<UserSession>,
    pub carts: Model<Cart>,
}

impl AccountStore {
    pub fn bind(binder: &ModelBinder) -> Result<Self> {
        let db = LogicalDb::Admin.as_str();
        Ok(Self {
            users: binder.bind(db)?,
            addresses: binder.bind(db)?,
            sessions: binder.bind(db)?,
            carts: binder.bind(db)?,
        })
    }

    /// Creates the account and returns it without credentials.
    #[instrument(skip_all)]
    pub async fn register(&self, user: User) -> Result<Document<User>> {
        let mut doc = self.users.create(user).await?;
        doc.data = doc.data.public_view();
        info!(user_id = %doc.id, "user registered");
        Ok(doc)
    }

    pub async fn find_by_email_or_username(&self, login: &str) -> Result<Option<Document<User>>> {
        let login = login.trim();
        let query = Query::new().filter(Condition::Any(vec![
            Condition::Eq("email".into(), json!(login.to_lowercase())),
            Condition::Eq("username".into(), json!(login)),
        ]));
        self.users.find_one(&query).await
    }

    pub async fn record_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<Document<User>> {
        let mut user = self.users.get(user_id).await?;
        user.data.record_login(at);
        self.users.replace(user).await
    }

    /// Adds a product to the user's favorites; a repeat add is a no-op.
    pub async fn add_favorite(&self, user_id: &str, product_id: &str) -> Result<Document<User>> {
        let mut user = self.users.get(user_id).await?;
        if user.favorites.iter().any(|f| f.product_id == product_id) {
            return Ok(user);
        }
        user.data.favorites.push(Favorite {
            product_id: product_id.to_string(),
            added_at: Utc::now(),
        });
        self.users.replace(user).await
    }

    pub async fn remove_favorite(&self, user_id: &str, product_id: &str) -> Result<Document<User>> {
        let mut user = self.users.get(user_id).await?;
        user.data.favorites.retain(|f| f.product_id != product_id);
        self.users.replace(user).await
    }

    /// Saves an address. The user's first address, or one flagged default,
    /// becomes the only default.
    #[instrument(skip_all)]
    pub async fn add_address(&self, mut address: UserAddress) -> Result<Document<UserAddress>> {
        let existing = self
            .addresses
            .count(&Query::new().eq("userId", address.user_id.as_str()).eq("isActive", true))
            .await?;
        if existing == 0 {
            address.is_default = true;
        }
        let created = self.addresses.create(address).await?;
        if created.is_default {
            self.clear_default(&created.user_id, Some(&created.id)).await?;
        }
        Ok(created)
    }

    pub async fn set_default_address(&self, address_id: &str) -> Result<Document<UserAddress>> {
        let address = self.addresses.get(address_id).await?;
        self.clear_default(&address.user_id, Some(address_id)).await?;
        self.addresses
            .update(address_id, json!({ "isDefault": true }))
            .await
    }

    async fn clear_default(&self, user_id: &str, keep: Option<&str>) -> Result<()> {
        let defaults = self
            .addresses
            .find(&Query::new().eq("userId", user_id).eq("isDefault", true))
            .await?;
        for other in defaults.into_iter().filter(|a| Some(a.id.as_str()) != keep) {
            self.addresses
                .update(&other.id, json!({ "isDefault": false }))
                .await?;
        }
        Ok(())
    }

    /// Active addresses, default first.
    pub async fn addresses_for(&self, user_id: &str) -> Result<Vec<Document<UserAddress>>> {
        let query = Query::new()
            .eq("userId", user_id)
            .eq("isActive", true)
            .sort(Sort::desc("isDefault"))
            .sort(Sort::desc("createdAt"));
        self.addresses.find(&query).await
    }

    pub async fn open_session(
        &self,
        user_id: &str,
        device_info: DeviceInfo,
        ttl: Duration,
    ) -> Result<Document<UserSession>> {
        let now = Utc::now();
        let token = Uuid::new_v4().simple().to_string();
        let mut session = UserSession::new(user_id, token, now + ttl);
        session.device_info = device_info;
        session.last_activity = Some(now);
        self.sessions.create(session).await
    }

    pub async fn session_by_token(&self, token: &str) -> Result<Option<Document<UserSession>>> {
        self.sessions
            .find_one(&Query::new().eq("sessionToken", token))
            .await
    }

    pub async fn terminate_session(&self, token: &str) -> Result<Document<UserSession>> {
        let mut session = self
            .session_by_token(token)
            .await?
            .ok_or_else(|| Error::NotFound {
                model: "UserSession",
                id: token.to_string(),
            })?;
        session.data.invalidate(Utc::now());
        self.sessions.replace(session).await
    }

    /// Ends every live session of a user. Returns how many were ended.
    #[instrument(skip_all)]
    pub async fn terminate_all_sessions(&self, user_id: &str) -> Result<u64> {
        let now = Utc::now();
        let live = self
            .sessions
            .find(&Query::new().eq("userId", user_id).eq("isActive", true))
            .await?;
        let mut ended = 0;
        for mut session in live {
            session.data.invalidate(now);
            self.sessions.replace(session).await?;
            ended += 1;
        }
        debug!(user_id, ended, "sessions terminated");
        Ok(ended)
    }

    pub async fn active_sessions(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Document<UserSession>>> {
        let query = Query::new()
            .eq("userId", user_id)
            .eq("isActive", true)
            .filter(Condition::After("expiresAt".into(), now))
            .sort(Sort::desc("lastActivity"));
        self.sessions.find(&query).await
    }

    /// The cart for a session, created empty on first use.
    pub async fn cart_for_session(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<Document<Cart>> {
        let found = self
            .carts
            .find_one(&Query::new().eq("sessionId", session_id))
            .await?;
        match found {
            Some(cart) => match user_id {
                Some(user) if cart.user_id.as_deref() != Some(user) => {
                    self.carts.update(&cart.id, json!({ "userId": user })).await
                }
                _ => Ok(cart),
            },
            None => {
                let mut cart = Cart::new(session_id, Utc::now());
                cart.user_id = user_id.map(str::to_owned);
                self.carts.create(cart).await
            }
        }
    }

    async fn with_cart<F>(&self, session_id: &str, change: F) -> Result<Document<Cart>>
    where
        F: FnOnce(&mut Cart) -> Result<()>,
    {
        let mut cart = self.cart_for_session(session_id, None).await?;
        change(&mut cart.data)?;
        self.carts.replace(cart).await
    }

    pub async fn add_to_cart(&self, session_id: &str, item: CartItem) -> Result<Document<Cart>> {
        self.with_cart(session_id, |cart| {
            cart.add_item(item);
            Ok(())
        })
        .await
    }

    /// Sets a line's quantity; zero removes the line.
    pub async fn update_cart_item(
        &self,
        session_id: &str,
        product_id: &str,
        quantity: u32,
    ) -> Result<Document<Cart>> {
        self.with_cart(session_id, |cart| {
            if cart.update_quantity(product_id, quantity) {
                Ok(())
            } else {
                Err(Error::NotFound {
                    model: "CartItem",
                    id: product_id.to_string(),
                })
            }
        })
        .await
    }

    pub async fn remove_from_cart(&self, session_id: &str, product_id: &str) -> Result<Document<Cart>> {
        self.with_cart(session_id, |cart| {
            if cart.remove_item(product_id) {
                Ok(())
            } else {
                Err(Error::NotFound {
                    model: "CartItem",
                    id: product_id.to_string(),
                })
            }
        })
        .await
    }

    pub async fn clear_cart(&self, session_id: &str) -> Result<Document<Cart>> {
        self.with_cart(session_id, |cart| {
            cart.clear();
            Ok(())
        })
        .await
    }

    pub async fn apply_coupon(&self, session_id: &str, coupon: AppliedCoupon) -> Result<Document<Cart>> {
        self.with_cart(session_id, |cart| {
            let code = coupon.code.trim().to_uppercase();
            if cart
                .applied_coupons
                .iter()
                .any(|c| c.code.eq_ignore_ascii_case(&code))
            {
                return Err(Error::Rejected("Coupon already applied".into()));
            }
            cart.applied_coupons.push(AppliedCoupon { code, ..coupon });
            Ok(())
        })
        .await
    }

    pub async fn remove_coupon(&self, session_id: &str, code: &str) -> Result<Document<Cart>> {
        self.with_cart(session_id, |cart| {
            cart.applied_coupons
                .retain(|c| !c.code.eq_ignore_ascii_case(code.trim()));
            Ok(())
        })
        .await
    }
}
