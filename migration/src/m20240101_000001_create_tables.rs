use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Users::Email)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Users::Username).string().not_null())
                    .col(ColumnDef::new(Users::PasswordHash).string().not_null())
                    .col(
                        ColumnDef::new(Users::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Games::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Games::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Games::HostId).integer().not_null())
                    .col(ColumnDef::new(Games::NumPlayers).integer().not_null())
                    .col(ColumnDef::new(Games::NumWords).integer().not_null())
                    .col(ColumnDef::new(Games::NumStages).integer().not_null())
                    .col(ColumnDef::new(Games::Timer).integer().not_null())
                    .col(
                        ColumnDef::new(Games::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_games_host")
                            .from(Games::Table, Games::HostId)
                            .to(Users::Table, Users::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Words::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Words::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Words::Word)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PlayerWords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PlayerWords::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PlayerWords::GameId).integer().not_null())
                    .col(ColumnDef::new(PlayerWords::AuthorId).integer().not_null())
                    .col(ColumnDef::new(PlayerWords::WordId).integer().not_null())
                    .col(ColumnDef::new(PlayerWords::GuessedById).integer().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_player_words_game")
                            .from(PlayerWords::Table, PlayerWords::GameId)
                            .to(Games::Table, Games::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_player_words_author")
                            .from(PlayerWords::Table, PlayerWords::AuthorId)
                            .to(Users::Table, Users::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_player_words_word")
                            .from(PlayerWords::Table, PlayerWords::WordId)
                            .to(Words::Table, Words::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // Author lookups back the top-words statistic
        manager
            .create_index(
                Index::create()
                    .name("idx_player_words_author")
                    .table(PlayerWords::Table)
                    .col(PlayerWords::AuthorId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Teams::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Teams::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Teams::FirstId).integer().not_null())
                    .col(ColumnDef::new(Teams::SecondId).integer().not_null())
                    .to_owned(),
            )
            .await?;

        // A pair is stored once, as (min, max)
        manager
            .create_index(
                Index::create()
                    .name("idx_teams_pair")
                    .table(Teams::Table)
                    .col(Teams::FirstId)
                    .col(Teams::SecondId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Results::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Results::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Results::GameId).integer().not_null())
                    .col(ColumnDef::new(Results::TeamId).integer().not_null())
                    .col(ColumnDef::new(Results::Stage).integer().not_null())
                    .col(ColumnDef::new(Results::Score).big_integer().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_results_game")
                            .from(Results::Table, Results::GameId)
                            .to(Games::Table, Games::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_results_team")
                            .from(Results::Table, Results::TeamId)
                            .to(Teams::Table, Teams::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PlayerGames::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PlayerGames::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PlayerGames::UserId).integer().not_null())
                    .col(ColumnDef::new(PlayerGames::GameId).integer().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_player_games_user")
                            .from(PlayerGames::Table, PlayerGames::UserId)
                            .to(Users::Table, Users::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_player_games_game")
                            .from(PlayerGames::Table, PlayerGames::GameId)
                            .to(Games::Table, Games::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_player_games_user")
                    .table(PlayerGames::Table)
                    .col(PlayerGames::UserId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PlayerGames::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Results::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Teams::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PlayerWords::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Words::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Games::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Email,
    Username,
    PasswordHash,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Games {
    Table,
    Id,
    HostId,
    NumPlayers,
    NumWords,
    NumStages,
    Timer,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Words {
    Table,
    Id,
    Word,
}

#[derive(DeriveIden)]
enum PlayerWords {
    Table,
    Id,
    GameId,
    AuthorId,
    WordId,
    GuessedById,
}

#[derive(DeriveIden)]
enum Teams {
    Table,
    Id,
    FirstId,
    SecondId,
}

#[derive(DeriveIden)]
enum Results {
    Table,
    Id,
    GameId,
    TeamId,
    Stage,
    Score,
}

#[derive(DeriveIden)]
enum PlayerGames {
    Table,
    Id,
    UserId,
    GameId,
}
