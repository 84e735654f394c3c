//! The bundled echo problem.
//!
//! Every query token is sent to every instance as one line; a correct
//! instance answers with the same line. An instance whose pipe breaks or
//! reaches EOF receives no further queries in that round.

use tracing::{debug, info, instrument};

use crate::collab::{ExactMatch, OutputComparator, TokenService, WhitespaceTokens};
use crate::core::verdict::Verdict;
use crate::error::{CheckError, SessionError};
use crate::io::channel::ChannelOpener;
use crate::io::config::EchoConfig;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoProblem {
    queries: Vec<String>,
    rounds: u32,
}

/// Result of one round across all instances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundScore {
    pub correct: usize,
    pub asked: usize,
}

impl RoundScore {
    pub fn fraction(self) -> f64 {
        if self.asked == 0 {
            return 0.0;
        }
        self.correct as f64 / self.asked as f64
    }

    fn message(self) -> &'static str {
        if self.asked > 0 && self.correct == self.asked {
            "correct"
        } else if self.correct > 0 {
            "partial"
        } else {
            "wrong answer"
        }
    }
}

impl EchoProblem {
    /// Parse `q` followed by `q` query tokens from `text`.
    pub fn parse(text: &str, config: &EchoConfig) -> Result<Self, CheckError> {
        let mut tokens = WhitespaceTokens::new(text).bound("q", 1, config.max_queries);
        Self::from_input(&mut tokens, config.rounds)
    }

    pub fn from_input<T: TokenService>(tokens: &mut T, rounds: u32) -> Result<Self, CheckError> {
        let count = tokens.parse_and_auto_check("q")?;
        let queries = (0..count)
            .map(|i| tokens.next_token(&format!("query {i}")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            queries,
            rounds: rounds.max(1),
        })
    }

    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    /// Play every round and build the verdict.
    #[instrument(skip_all, fields(rounds = self.rounds, queries = self.queries.len()))]
    pub fn run<O: ChannelOpener>(&self, session: &mut Session<O>) -> Result<Verdict, SessionError> {
        let comparator = ExactMatch;
        let mut scores = Vec::with_capacity(self.rounds as usize);
        for round in 0..self.rounds {
            if round > 0 {
                session.restart_or_abort()?;
            }
            let score = self.play_round(session, &comparator)?;
            info!(round, correct = score.correct, asked = score.asked, "round finished");
            scores.push(score);
        }
        if session.has_kill_switch() {
            session.kill_and_wait()?;
        }

        if let [only] = scores.as_slice() {
            return Ok(Verdict::scalar(only.fraction(), only.message()));
        }
        Ok(Verdict::structured(scores.iter().enumerate().map(|(round, score)| {
            (score.fraction(), format!("round {}: {}", round + 1, score.message()))
        })))
    }

    /// Send every query to every live instance and count matching answers.
    pub fn play_round<O: ChannelOpener>(
        &self,
        session: &mut Session<O>,
        comparator: &dyn OutputComparator,
    ) -> Result<RoundScore, SessionError> {
        let instances = session.instance_count();
        let mut alive = vec![true; instances];
        let mut score = RoundScore {
            correct: 0,
            asked: self.queries.len() * instances,
        };
        for query in &self.queries {
            for (index, live) in alive.iter_mut().enumerate() {
                if !*live {
                    continue;
                }
                let instance = session.instance(index)?;
                let answer = instance
                    .send_line(query)
                    .and_then(|()| instance.read_line());
                match answer {
                    Ok(answer) if comparator.compare(&answer, query) => score.correct += 1,
                    Ok(answer) => debug!(index, %query, %answer, "wrong echo"),
                    Err(err) => {
                        debug!(index, %err, "instance dropped out");
                        *live = false;
                    }
                }
            }
        }
        Ok(score)
    }
}
