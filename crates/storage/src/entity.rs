pub mod articles {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "articles")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        #[sea_orm(unique)]
        pub slug: String,
        pub author_id: String,
        pub title: String,
        pub abstract_text: String,
        /// JSON array of lowercase tags.
        pub tags: String,
        pub file_reference: String,
        pub status: ArticleStatusDb,
        pub rejection_reason: Option<String>,
        pub utr_number: Option<String>,
        pub is_featured: bool,
        pub created_at: DateTimeUtc,
        pub updated_at: DateTimeUtc,
        pub published_at: Option<DateTimeUtc>,
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
    #[sea_orm(rs_type = "i8", db_type = "TinyInteger")]
    pub enum ArticleStatusDb {
        #[sea_orm(num_value = 0)]
        Pending,
        #[sea_orm(num_value = 1)]
        AwaitingPayment,
        #[sea_orm(num_value = 2)]
        PaymentSubmitted,
        #[sea_orm(num_value = 3)]
        Published,
        #[sea_orm(num_value = 4)]
        Rejected,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod payment_tokens {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "payment_tokens")]
    pub struct Model {
        /// SHA3-256 hex of the emailed token; the token itself is never stored.
        #[sea_orm(primary_key, auto_increment = false)]
        pub fingerprint: String,
        pub article_id: i64,
        pub user_id: String,
        pub issued_at: DateTimeUtc,
        pub expires_at: DateTimeUtc,
        pub used: bool,
        pub used_at: Option<DateTimeUtc>,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod profiles {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "profiles")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub user_id: String,
        pub is_admin: bool,
        pub email: String,
        pub display_name: String,
        pub editor_role: Option<String>,
        pub institution: Option<String>,
        pub display_order: Option<i32>,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod article_transitions {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "article_transitions")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub article_id: i64,
        pub action: String,
        pub from_status: Option<String>,
        pub to_status: String,
        pub actor_id: String,
        pub note: Option<String>,
        pub occurred_at: DateTimeUtc,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod outbox_emails {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "outbox_emails")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub article_id: Option<i64>,
        pub kind: String,
        pub recipient: String,
        pub subject: String,
        pub html_body: String,
        pub text_body: String,
        pub status: OutboxStatusDb,
        pub attempts: i32,
        pub last_error: Option<String>,
        pub created_at: DateTimeUtc,
        /// Unix millis so the due query is a plain integer comparison.
        pub next_attempt_ms: i64,
        pub delivered_at: Option<DateTimeUtc>,
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
    #[sea_orm(rs_type = "i8", db_type = "TinyInteger")]
    pub enum OutboxStatusDb {
        #[sea_orm(num_value = 0)]
        Pending,
        #[sea_orm(num_value = 1)]
        Delivered,
        #[sea_orm(num_value = 2)]
        Abandoned,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
