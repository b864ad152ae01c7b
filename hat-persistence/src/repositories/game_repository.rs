use std::collections::HashMap;

use async_trait::async_trait;
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, JoinType, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait,
    TransactionTrait,
};
use tracing::info;

use crate::PersistenceError;
use crate::entities::{games, player_games, player_words, prelude::*, results, teams, words};
use hat_core::{CompletedGame, GameStore};
use hat_types::{Statistics, UserId, WordCount};

pub struct GameRepository {
    db: DatabaseConnection,
}

impl GameRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Write a finished game: one row per submitted word (with author and
    /// last-stage guesser), one row per team per stage, and the player
    /// memberships. Word and team rows are shared across games.
    pub async fn record_game(&self, game: &CompletedGame) -> Result<u32, PersistenceError> {
        let txn = self.db.begin().await.map_err(PersistenceError::Insert)?;

        let game_row = games::ActiveModel {
            id: ActiveValue::NotSet,
            host_id: ActiveValue::Set(game.host),
            num_players: ActiveValue::Set(game.settings.num_players as i32),
            num_words: ActiveValue::Set(game.settings.num_words as i32),
            num_stages: ActiveValue::Set(game.settings.num_stages as i32),
            timer: ActiveValue::Set(game.settings.turn_seconds as i32),
            created_at: ActiveValue::Set(chrono::Utc::now().into()),
        }
        .insert(&txn)
        .await
        .map_err(PersistenceError::Insert)?;

        for (&author, word_set) in &game.words_by_user {
            for word in word_set {
                let word_id = Self::find_or_create_word(&txn, word).await?;
                player_words::ActiveModel {
                    id: ActiveValue::NotSet,
                    game_id: ActiveValue::Set(game_row.id),
                    author_id: ActiveValue::Set(author),
                    word_id: ActiveValue::Set(word_id),
                    guessed_by_id: ActiveValue::Set(game.guessed.get(word).copied()),
                }
                .insert(&txn)
                .await
                .map_err(PersistenceError::Insert)?;
            }
        }

        for stage in &game.stage_results {
            for result in &stage.results {
                let team_id =
                    Self::find_or_create_team(&txn, result.first_id, result.second_id).await?;
                results::ActiveModel {
                    id: ActiveValue::NotSet,
                    game_id: ActiveValue::Set(game_row.id),
                    team_id: ActiveValue::Set(team_id),
                    stage: ActiveValue::Set(stage.stage),
                    score: ActiveValue::Set(result.score),
                }
                .insert(&txn)
                .await
                .map_err(PersistenceError::Insert)?;
            }
        }

        for player in &game.players {
            player_games::ActiveModel {
                id: ActiveValue::NotSet,
                user_id: ActiveValue::Set(player.id),
                game_id: ActiveValue::Set(game_row.id),
            }
            .insert(&txn)
            .await
            .map_err(PersistenceError::Insert)?;
        }

        txn.commit().await.map_err(PersistenceError::Insert)?;
        info!(game = game.id, record = game_row.id, "finished game recorded");
        Ok(game_row.id)
    }

    async fn find_or_create_word(
        txn: &DatabaseTransaction,
        word: &str,
    ) -> Result<u32, PersistenceError> {
        if let Some(existing) = Words::find()
            .filter(words::Column::Word.eq(word))
            .one(txn)
            .await
            .map_err(PersistenceError::Query)?
        {
            return Ok(existing.id);
        }
        let inserted = words::ActiveModel {
            id: ActiveValue::NotSet,
            word: ActiveValue::Set(word.to_string()),
        }
        .insert(txn)
        .await
        .map_err(PersistenceError::Insert)?;
        Ok(inserted.id)
    }

    async fn find_or_create_team(
        txn: &DatabaseTransaction,
        first_id: UserId,
        second_id: UserId,
    ) -> Result<u32, PersistenceError> {
        if let Some(existing) = Teams::find()
            .filter(teams::Column::FirstId.eq(first_id))
            .filter(teams::Column::SecondId.eq(second_id))
            .one(txn)
            .await
            .map_err(PersistenceError::Query)?
        {
            return Ok(existing.id);
        }
        let inserted = teams::ActiveModel {
            id: ActiveValue::NotSet,
            first_id: ActiveValue::Set(first_id),
            second_id: ActiveValue::Set(second_id),
        }
        .insert(txn)
        .await
        .map_err(PersistenceError::Insert)?;
        Ok(inserted.id)
    }

    /// Aggregate stats for one user: games played, wins and ties judged on
    /// each game's final stage, and the five words they submit most often.
    pub async fn user_statistics(&self, id: UserId) -> Result<Statistics, PersistenceError> {
        let games_played = PlayerGames::find()
            .filter(player_games::Column::UserId.eq(id))
            .count(&self.db)
            .await
            .map_err(PersistenceError::Query)? as i64;

        let top_words: Vec<(String, i64)> = PlayerWords::find()
            .select_only()
            .column(words::Column::Word)
            .column_as(player_words::Column::Id.count(), "count")
            .join(JoinType::InnerJoin, player_words::Relation::Word.def())
            .filter(player_words::Column::AuthorId.eq(id))
            .group_by(words::Column::Word)
            .order_by_desc(player_words::Column::Id.count())
            .limit(5)
            .into_tuple()
            .all(&self.db)
            .await
            .map_err(PersistenceError::Query)?;

        let game_ids: Vec<u32> = PlayerGames::find()
            .select_only()
            .column(player_games::Column::GameId)
            .filter(player_games::Column::UserId.eq(id))
            .into_tuple()
            .all(&self.db)
            .await
            .map_err(PersistenceError::Query)?;

        let rows = Results::find()
            .find_also_related(Teams)
            .filter(results::Column::GameId.is_in(game_ids))
            .all(&self.db)
            .await
            .map_err(PersistenceError::Query)?;

        let mut by_game: HashMap<u32, Vec<(u32, i64, teams::Model)>> = HashMap::new();
        for (result, team) in rows {
            if let Some(team) = team {
                by_game
                    .entry(result.game_id)
                    .or_default()
                    .push((result.stage, result.score, team));
            }
        }

        let mut number_of_wins = 0;
        let mut number_of_ties = 0;
        for stage_rows in by_game.values() {
            let Some(final_stage) = stage_rows.iter().map(|(stage, ..)| *stage).max() else {
                continue;
            };
            let finals: Vec<_> = stage_rows
                .iter()
                .filter(|(stage, ..)| *stage == final_stage)
                .collect();
            let Some(top_score) = finals.iter().map(|(_, score, _)| *score).max() else {
                continue;
            };
            let winners: Vec<_> = finals
                .iter()
                .filter(|(_, score, _)| *score == top_score)
                .collect();
            if winners
                .iter()
                .any(|(.., team)| team.first_id == id || team.second_id == id)
            {
                if winners.len() == 1 {
                    number_of_wins += 1;
                } else {
                    number_of_ties += 1;
                }
            }
        }

        Ok(Statistics {
            games_played,
            number_of_wins,
            number_of_ties,
            top_words: top_words
                .into_iter()
                .map(|(word, count)| WordCount { word, count })
                .collect(),
        })
    }

    /// Sample up to `n` distinct words for a user to reuse, weighting each
    /// word by `total submissions - this user's submissions` so other
    /// players' vocabulary is preferred.
    pub async fn recommend_words(
        &self,
        id: UserId,
        n: usize,
    ) -> Result<Vec<String>, PersistenceError> {
        let totals: Vec<(String, i64)> = PlayerWords::find()
            .select_only()
            .column(words::Column::Word)
            .column_as(player_words::Column::Id.count(), "count")
            .join(JoinType::InnerJoin, player_words::Relation::Word.def())
            .group_by(words::Column::Word)
            .into_tuple()
            .all(&self.db)
            .await
            .map_err(PersistenceError::Query)?;

        let own: HashMap<String, i64> = PlayerWords::find()
            .select_only()
            .column(words::Column::Word)
            .column_as(player_words::Column::Id.count(), "count")
            .join(JoinType::InnerJoin, player_words::Relation::Word.def())
            .filter(player_words::Column::AuthorId.eq(id))
            .group_by(words::Column::Word)
            .into_tuple()
            .all(&self.db)
            .await
            .map_err(PersistenceError::Query)?
            .into_iter()
            .collect();

        let candidates: Vec<(String, i64)> = totals
            .into_iter()
            .map(|(word, total)| {
                let weight = total - own.get(&word).copied().unwrap_or(0);
                (word, weight)
            })
            .collect();

        Ok(Self::sample_words(candidates, n))
    }

    fn sample_words(mut candidates: Vec<(String, i64)>, n: usize) -> Vec<String> {
        let mut rng = rand::thread_rng();
        let mut picked = Vec::with_capacity(n.min(candidates.len()));

        while picked.len() < n && !candidates.is_empty() {
            let weights: Vec<i64> = candidates.iter().map(|(_, w)| (*w).max(0)).collect();
            let index = match WeightedIndex::new(&weights) {
                Ok(dist) => dist.sample(&mut rng),
                // A single distinct word, or no weighted mass left: uniform.
                Err(_) => rng.gen_range(0..candidates.len()),
            };
            picked.push(candidates.swap_remove(index).0);
        }
        picked
    }
}

#[async_trait]
impl GameStore for GameRepository {
    async fn add_game(&self, game: &CompletedGame) -> anyhow::Result<()> {
        self.record_game(game).await?;
        Ok(())
    }
}
