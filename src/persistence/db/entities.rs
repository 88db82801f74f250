use sea_orm::entity::prelude::*;

pub mod entity_channel {
    use super::*;
    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "channels")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub channel_type: i32,
        pub key: String,
        pub status: i32,
        pub name: String,
        pub weight: i64,
        pub priority: i64,
        #[sea_orm(nullable)]
        pub base_url: Option<String>,
        /// Comma separated
        pub models: String,
        /// JSON object
        pub model_mapping: String,
        #[sea_orm(column_type = "Double")]
        pub balance: f64,
        pub balance_updated_at: i64,
        pub used_quota: i64,
        pub response_time: i64,
        pub test_time: i64,
        #[sea_orm(column_name = "group")]
        pub channel_group: String,
        pub created_time: i64,
        #[sea_orm(nullable)]
        pub disabled_reason: Option<String>,
    }
    #[derive(Copy, Clone, Debug, EnumIter)]
    pub enum Relation {}
    impl RelationTrait for Relation {
        fn def(&self) -> RelationDef {
            match *self {}
        }
    }
    impl ActiveModelBehavior for ActiveModel {}
}

pub mod entity_token {
    use super::*;
    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "tokens")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub user_id: i64,
        #[sea_orm(unique)]
        pub key: String,
        pub status: i32,
        pub name: String,
        pub created_time: i64,
        pub accessed_time: i64,
        pub expired_time: i64,
        pub remain_quota: i64,
        pub unlimited_quota: bool,
        pub used_quota: i64,
    }
    #[derive(Copy, Clone, Debug, EnumIter)]
    pub enum Relation {}
    impl RelationTrait for Relation {
        fn def(&self) -> RelationDef {
            match *self {}
        }
    }
    impl ActiveModelBehavior for ActiveModel {}
}

pub mod entity_user {
    use super::*;
    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "users")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub username: String,
        #[sea_orm(nullable)]
        pub email: Option<String>,
        pub role: i32,
        pub status: i32,
        pub quota: i64,
        pub used_quota: i64,
        pub request_count: i64,
    }
    #[derive(Copy, Clone, Debug, EnumIter)]
    pub enum Relation {}
    impl RelationTrait for Relation {
        fn def(&self) -> RelationDef {
            match *self {}
        }
    }
    impl ActiveModelBehavior for ActiveModel {}
}

pub mod entity_redemption {
    use super::*;
    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "redemptions")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        #[sea_orm(nullable)]
        pub user_id: Option<i64>,
        #[sea_orm(unique)]
        pub key: String,
        pub status: i32,
        pub name: String,
        pub quota: i64,
        pub created_time: i64,
        pub redeemed_time: i64,
    }
    #[derive(Copy, Clone, Debug, EnumIter)]
    pub enum Relation {}
    impl RelationTrait for Relation {
        fn def(&self) -> RelationDef {
            match *self {}
        }
    }
    impl ActiveModelBehavior for ActiveModel {}
}

pub mod entity_log {
    use super::*;
    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "logs")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub user_id: i64,
        pub created_at: i64,
        #[sea_orm(column_name = "type")]
        pub kind: i32,
        pub content: String,
        pub username: String,
        pub token_name: String,
        pub model_name: String,
        pub quota: i64,
        pub prompt_tokens: i64,
        pub completion_tokens: i64,
        pub channel_id: i64,
    }
    #[derive(Copy, Clone, Debug, EnumIter)]
    pub enum Relation {}
    impl RelationTrait for Relation {
        fn def(&self) -> RelationDef {
            match *self {}
        }
    }
    impl ActiveModelBehavior for ActiveModel {}
}

pub mod entity_option {
    use super::*;
    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "options")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false, column_name = "key")]
        pub k: String,
        pub value: String,
    }
    #[derive(Copy, Clone, Debug, EnumIter)]
    pub enum Relation {}
    impl RelationTrait for Relation {
        fn def(&self) -> RelationDef {
            match *self {}
        }
    }
    impl ActiveModelBehavior for ActiveModel {}
}

pub use entity_channel::{
    ActiveModel as ActiveModelChannel, Column as ColumnChannel, Entity as EntityChannel,
    Model as ModelChannel,
};
pub use entity_log::{
    ActiveModel as ActiveModelLog, Column as ColumnLog, Entity as EntityLog, Model as ModelLog,
};
pub use entity_option::{
    ActiveModel as ActiveModelOption, Column as ColumnOption, Entity as EntityOption,
};
pub use entity_redemption::{
    ActiveModel as ActiveModelRedemption, Column as ColumnRedemption, Entity as EntityRedemption,
    Model as ModelRedemption,
};
pub use entity_token::{
    ActiveModel as ActiveModelToken, Column as ColumnToken, Entity as EntityToken,
    Model as ModelToken,
};
pub use entity_user::{
    ActiveModel as ActiveModelUser, Column as ColumnUser, Entity as EntityUser, Model as ModelUser,
};
