use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter,
};

use crate::PersistenceError;
use crate::entities::{prelude::*, users};
use hat_types::{User, UserId};

pub struct UserRepository {
    db: DatabaseConnection,
}

impl UserRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn model_to_user(model: &users::Model) -> User {
        User {
            id: model.id,
            email: model.email.clone(),
            username: model.username.clone(),
        }
    }

    pub async fn find_by_id(&self, id: UserId) -> Result<Option<users::Model>, PersistenceError> {
        Users::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(PersistenceError::Query)
    }

    pub async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<users::Model>, PersistenceError> {
        Users::find()
            .filter(users::Column::Email.eq(email))
            .one(&self.db)
            .await
            .map_err(PersistenceError::Query)
    }

    /// Register a new account. The password arrives already hashed.
    pub async fn create_user(
        &self,
        email: &str,
        username: &str,
        password_hash: &str,
    ) -> Result<User, PersistenceError> {
        if self.find_by_email(email).await?.is_some() {
            return Err(PersistenceError::Conflict(
                "user with that email already exists".to_string(),
            ));
        }

        let user = users::ActiveModel {
            id: ActiveValue::NotSet,
            email: ActiveValue::Set(email.to_string()),
            username: ActiveValue::Set(username.to_string()),
            password_hash: ActiveValue::Set(password_hash.to_string()),
            created_at: ActiveValue::Set(chrono::Utc::now().into()),
        };

        let inserted = user
            .insert(&self.db)
            .await
            .map_err(PersistenceError::Insert)?;
        Ok(Self::model_to_user(&inserted))
    }

    /// Change the username, and the password when a new hash is supplied.
    pub async fn update_user(
        &self,
        id: UserId,
        username: &str,
        password_hash: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let user = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| {
                PersistenceError::Update(DbErr::RecordNotFound(format!("user {id}")))
            })?;

        let mut active: users::ActiveModel = user.into();
        active.username = ActiveValue::Set(username.to_string());
        if let Some(hash) = password_hash {
            active.password_hash = ActiveValue::Set(hash.to_string());
        }
        active
            .update(&self.db)
            .await
            .map_err(PersistenceError::Update)?;
        Ok(())
    }
}
