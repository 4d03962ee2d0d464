use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create marketplace_questions table
        manager
            .create_table(
                Table::create()
                    .table(MarketplaceQuestions::Table)
                    .if_not_exists()
                    .col(pk_uuid(MarketplaceQuestions::Id))
                    .col(ColumnDef::new(MarketplaceQuestions::DiyerId).uuid().not_null())
                    .col(
                        ColumnDef::new(MarketplaceQuestions::Category)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(MarketplaceQuestions::Body).text().not_null())
                    .col(
                        ColumnDef::new(MarketplaceQuestions::PhotoCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(MarketplaceQuestions::ExpertId).uuid().null())
                    .col(
                        ColumnDef::new(MarketplaceQuestions::TargetExpertId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MarketplaceQuestions::Status)
                            .string_len(20)
                            .not_null()
                            .default("open"),
                    )
                    .col(
                        ColumnDef::new(MarketplaceQuestions::MarkedNotHelpful)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(MarketplaceQuestions::PayoutStatus)
                            .string_len(20)
                            .not_null()
                            .default("pending"),
                    )
                    .col(timestamp_with_time_zone_null(MarketplaceQuestions::ClaimedAt))
                    .col(timestamp_with_time_zone_null(
                        MarketplaceQuestions::ClaimExpiresAt,
                    ))
                    .col(timestamp_with_time_zone_null(MarketplaceQuestions::AnsweredAt))
                    .col(timestamp_with_time_zone_null(MarketplaceQuestions::AcceptedAt))
                    .col(ColumnDef::new(MarketplaceQuestions::Answer).text().null())
                    .col(ColumnDef::new(MarketplaceQuestions::Rating).small_integer().null())
                    .col(
                        ColumnDef::new(MarketplaceQuestions::PriceCents)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MarketplaceQuestions::PlatformFeeCents)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MarketplaceQuestions::ExpertPayoutCents)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MarketplaceQuestions::PricingMode)
                            .string_len(20)
                            .not_null()
                            .default("fixed"),
                    )
                    .col(
                        ColumnDef::new(MarketplaceQuestions::DifficultyScore)
                            .small_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MarketplaceQuestions::PriceTier)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(timestamp_with_time_zone_null(MarketplaceQuestions::BidDeadline))
                    .col(
                        ColumnDef::new(MarketplaceQuestions::BidCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(MarketplaceQuestions::AcceptedBidId).uuid().null())
                    .col(
                        ColumnDef::new(MarketplaceQuestions::CurrentTier)
                            .small_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(MarketplaceQuestions::CreditAppliedCents)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MarketplaceQuestions::CreditOwedCents)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MarketplaceQuestions::ChargeRef)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        timestamp_with_time_zone(MarketplaceQuestions::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(MarketplaceQuestions::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Create marketplace_bids table
        manager
            .create_table(
                Table::create()
                    .table(MarketplaceBids::Table)
                    .if_not_exists()
                    .col(pk_uuid(MarketplaceBids::Id))
                    .col(ColumnDef::new(MarketplaceBids::QuestionId).uuid().not_null())
                    .col(ColumnDef::new(MarketplaceBids::ExpertId).uuid().not_null())
                    .col(
                        ColumnDef::new(MarketplaceBids::ProposedPriceCents)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MarketplaceBids::Status)
                            .string_len(20)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        timestamp_with_time_zone(MarketplaceBids::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(MarketplaceBids::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_marketplace_bids_question")
                            .from(MarketplaceBids::Table, MarketplaceBids::QuestionId)
                            .to(MarketplaceQuestions::Table, MarketplaceQuestions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Create marketplace_messages table
        manager
            .create_table(
                Table::create()
                    .table(MarketplaceMessages::Table)
                    .if_not_exists()
                    .col(pk_uuid(MarketplaceMessages::Id))
                    .col(
                        ColumnDef::new(MarketplaceMessages::QuestionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MarketplaceMessages::AuthorId).uuid().not_null())
                    .col(
                        ColumnDef::new(MarketplaceMessages::AuthorRole)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(ColumnDef::new(MarketplaceMessages::Body).text().not_null())
                    .col(
                        timestamp_with_time_zone(MarketplaceMessages::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_marketplace_messages_question")
                            .from(MarketplaceMessages::Table, MarketplaceMessages::QuestionId)
                            .to(MarketplaceQuestions::Table, MarketplaceQuestions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Create marketplace_expert_profiles table
        manager
            .create_table(
                Table::create()
                    .table(MarketplaceExpertProfiles::Table)
                    .if_not_exists()
                    .col(pk_uuid(MarketplaceExpertProfiles::ExpertId))
                    .col(
                        ColumnDef::new(MarketplaceExpertProfiles::ReputationScore)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(MarketplaceExpertProfiles::ExpertLevel)
                            .string_len(20)
                            .not_null()
                            .default("bronze"),
                    )
                    .col(
                        ColumnDef::new(MarketplaceExpertProfiles::SubscriptionTier)
                            .string_len(20)
                            .not_null()
                            .default("free"),
                    )
                    .col(
                        ColumnDef::new(MarketplaceExpertProfiles::Specialties)
                            .json_binary()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(MarketplaceExpertProfiles::PayoutAccountRef)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MarketplaceExpertProfiles::OnboardingComplete)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(MarketplaceExpertProfiles::CorrectionsCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MarketplaceExpertProfiles::GraduationsCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        timestamp_with_time_zone(MarketplaceExpertProfiles::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Create marketplace_billing_profiles table
        manager
            .create_table(
                Table::create()
                    .table(MarketplaceBillingProfiles::Table)
                    .if_not_exists()
                    .col(pk_uuid(MarketplaceBillingProfiles::DiyerId))
                    .col(
                        ColumnDef::new(MarketplaceBillingProfiles::CustomerRef)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MarketplaceBillingProfiles::PaymentMethodRef)
                            .string_len(255)
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Create marketplace_credit_accounts table
        manager
            .create_table(
                Table::create()
                    .table(MarketplaceCreditAccounts::Table)
                    .if_not_exists()
                    .col(pk_uuid(MarketplaceCreditAccounts::DiyerId))
                    .col(
                        ColumnDef::new(MarketplaceCreditAccounts::BalanceCents)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        timestamp_with_time_zone(MarketplaceCreditAccounts::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(MarketplaceCreditAccounts::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Create marketplace_credit_transactions table
        manager
            .create_table(
                Table::create()
                    .table(MarketplaceCreditTransactions::Table)
                    .if_not_exists()
                    .col(pk_uuid(MarketplaceCreditTransactions::Id))
                    .col(
                        ColumnDef::new(MarketplaceCreditTransactions::DiyerId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MarketplaceCreditTransactions::AmountCents)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MarketplaceCreditTransactions::Reason)
                            .string_len(50)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MarketplaceCreditTransactions::QuestionId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        timestamp_with_time_zone(MarketplaceCreditTransactions::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Create marketplace_payment_attempts table
        manager
            .create_table(
                Table::create()
                    .table(MarketplacePaymentAttempts::Table)
                    .if_not_exists()
                    .col(pk_uuid(MarketplacePaymentAttempts::Id))
                    .col(
                        ColumnDef::new(MarketplacePaymentAttempts::QuestionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MarketplacePaymentAttempts::Kind)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MarketplacePaymentAttempts::AmountCents)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MarketplacePaymentAttempts::IdempotencyKey)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MarketplacePaymentAttempts::Reference)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MarketplacePaymentAttempts::Outcome)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(ColumnDef::new(MarketplacePaymentAttempts::Detail).text().null())
                    .col(
                        timestamp_with_time_zone(MarketplacePaymentAttempts::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Indexes
        manager
            .create_index(
                Index::create()
                    .name("idx_marketplace_questions_status_created")
                    .table(MarketplaceQuestions::Table)
                    .col(MarketplaceQuestions::Status)
                    .col(MarketplaceQuestions::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_marketplace_questions_diyer")
                    .table(MarketplaceQuestions::Table)
                    .col(MarketplaceQuestions::DiyerId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_marketplace_questions_expert")
                    .table(MarketplaceQuestions::Table)
                    .col(MarketplaceQuestions::ExpertId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_marketplace_questions_claim_expires")
                    .table(MarketplaceQuestions::Table)
                    .col(MarketplaceQuestions::ClaimExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_marketplace_bids_question")
                    .table(MarketplaceBids::Table)
                    .col(MarketplaceBids::QuestionId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_marketplace_messages_question")
                    .table(MarketplaceMessages::Table)
                    .col(MarketplaceMessages::QuestionId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_marketplace_credit_transactions_diyer")
                    .table(MarketplaceCreditTransactions::Table)
                    .col(MarketplaceCreditTransactions::DiyerId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_marketplace_payment_attempts_question")
                    .table(MarketplacePaymentAttempts::Table)
                    .col(MarketplacePaymentAttempts::QuestionId)
                    .to_owned(),
            )
            .await?;

        // Credit balance never goes negative
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                ALTER TABLE marketplace_credit_accounts
                    ADD CONSTRAINT chk_marketplace_credit_balance_non_negative
                    CHECK (balance_cents >= 0)
                "#,
            )
            .await?;

        // One pending bid per expert per question
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE UNIQUE INDEX IF NOT EXISTS idx_marketplace_bids_pending_unique
                    ON marketplace_bids (question_id, expert_id)
                    WHERE status = 'pending'
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(MarketplacePaymentAttempts::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(MarketplaceCreditTransactions::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(MarketplaceCreditAccounts::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(MarketplaceBillingProfiles::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(MarketplaceExpertProfiles::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(MarketplaceMessages::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(MarketplaceBids::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(MarketplaceQuestions::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum MarketplaceQuestions {
    Table,
    Id,
    DiyerId,
    Category,
    Body,
    PhotoCount,
    ExpertId,
    TargetExpertId,
    Status,
    MarkedNotHelpful,
    PayoutStatus,
    ClaimedAt,
    ClaimExpiresAt,
    AnsweredAt,
    AcceptedAt,
    Answer,
    Rating,
    PriceCents,
    PlatformFeeCents,
    ExpertPayoutCents,
    PricingMode,
    DifficultyScore,
    PriceTier,
    BidDeadline,
    BidCount,
    AcceptedBidId,
    CurrentTier,
    CreditAppliedCents,
    CreditOwedCents,
    ChargeRef,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum MarketplaceBids {
    Table,
    Id,
    QuestionId,
    ExpertId,
    ProposedPriceCents,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum MarketplaceMessages {
    Table,
    Id,
    QuestionId,
    AuthorId,
    AuthorRole,
    Body,
    CreatedAt,
}

#[derive(DeriveIden)]
enum MarketplaceExpertProfiles {
    Table,
    ExpertId,
    ReputationScore,
    ExpertLevel,
    SubscriptionTier,
    Specialties,
    PayoutAccountRef,
    OnboardingComplete,
    CorrectionsCount,
    GraduationsCount,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum MarketplaceBillingProfiles {
    Table,
    DiyerId,
    CustomerRef,
    PaymentMethodRef,
}

#[derive(DeriveIden)]
enum MarketplaceCreditAccounts {
    Table,
    DiyerId,
    BalanceCents,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum MarketplaceCreditTransactions {
    Table,
    Id,
    DiyerId,
    AmountCents,
    Reason,
    QuestionId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum MarketplacePaymentAttempts {
    Table,
    Id,
    QuestionId,
    Kind,
    AmountCents,
    IdempotencyKey,
    Reference,
    Outcome,
    Detail,
    CreatedAt,
}
