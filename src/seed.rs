//! Fills an empty database with random demo content.

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use sqlx::SqlitePool;
use tracing::{info, instrument};

use crate::auth::repo_types::{NewUser, User};
use crate::questions::repo_types::{
    Answer, AnswerRating, NewAnswer, NewAnswerRating, NewQuestion, Question, Vote,
};

const WORDS: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed", "do",
    "eiusmod", "tempor", "incididunt", "ut", "labore", "et", "dolore", "magna", "aliqua", "enim",
    "minim", "veniam", "quis", "nostrud", "exercitation", "ullamco", "laboris", "nisi", "aliquip",
    "commodo", "consequat", "duis", "aute", "irure", "voluptate", "velit", "esse", "cillum",
];

/// Password every demo account gets.
pub const DEMO_PASSWORD: &str = "1";

#[derive(Debug, Clone, Copy)]
pub struct SeedOptions {
    pub users: usize,
    pub questions: usize,
    /// Each question gets one of these answer counts at random.
    pub answers_per_question: [usize; 2],
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            users: 100,
            questions: 10,
            answers_per_question: [2, 10],
        }
    }
}

fn sentence(rng: &mut impl Rng, words: usize) -> String {
    let mut text = WORDS
        .choose_multiple(rng, words)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if let Some(first) = text.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    text
}

fn paragraphs(rng: &mut impl Rng, count: usize) -> String {
    (0..count)
        .map(|_| {
            let words = rng.gen_range(8..20);
            format!("{}.", sentence(rng, words))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Skips the whole run when any user exists already.
#[instrument(skip(pool))]
pub async fn seed_demo_data(pool: &SqlitePool, options: SeedOptions) -> anyhow::Result<()> {
    let mut rng = StdRng::from_entropy();
    let mut tx = pool.begin().await?;

    if User::count(&mut tx).await? > 0 {
        info!("database already has users; demo data not seeded");
        return Ok(());
    }

    let mut users = Vec::with_capacity(options.users);
    for n in 0..options.users {
        let user = User::create(&mut tx, &NewUser::new(format!("user{n}"), DEMO_PASSWORD)?).await?;
        users.push(user.id);
    }

    let mut answers = 0;
    for _ in 0..options.questions {
        let Some(&author) = users.choose(&mut rng) else {
            break;
        };
        let title = format!("{}?", sentence(&mut rng, 5));
        let content = paragraphs(&mut rng, 3);
        let question_id = Question::create(&mut tx, author, &NewQuestion::new(title, content)).await?;

        let count = *options.answers_per_question.choose(&mut rng).unwrap_or(&0);
        for _ in 0..count {
            let Some(&author) = users.choose(&mut rng) else {
                break;
            };
            let content = paragraphs(&mut rng, 1);
            let answer_id = Answer::create(&mut tx, author, question_id, &NewAnswer::new(content)).await?;
            answers += 1;

            for &voter in &users {
                let vote = if rng.gen_bool(0.5) { Vote::Up } else { Vote::Down };
                AnswerRating::create(&mut tx, voter, answer_id, &NewAnswerRating::new(vote)).await?;
            }
        }
    }

    tx.commit().await?;
    info!(
        users = users.len(),
        questions = options.questions,
        answers,
        "demo data seeded"
    );
    Ok(())
}
