//! Trajectory-to-segment conversion.
//!
//! The dataset builder consumes per-trajectory lists of `(text, is_action)`
//! segments. [`SegmentStream`] produces them lazily, one list per trajectory
//! in input order, logging a progress line on a fixed cadence. The logging is
//! diagnostic only and never changes what is yielded.

use tracing::info;

use super::trajectory::Trajectory;

/// A `(text, is_action)` pair, the unit the dataset builder tokenizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub is_action: bool,
}

/// Lazy converter from trajectories to segment lists.
///
/// Single-pass: restartable only by constructing a new stream over the
/// source. Callers that need multiple passes should collect the output (the
/// trainer materializes the train-side lists once at startup).
pub struct SegmentStream<I> {
    source: I,
    label: String,
    quiet: bool,
    count: usize,
}

impl<'a, I> SegmentStream<I>
where
    I: Iterator<Item = &'a Trajectory>,
{
    /// Wrap a trajectory iterator. `label` tags the progress lines
    /// (e.g. "TRAIN" / "EVAL"); `quiet` widens the cadence from every 50th
    /// trajectory to every 1000th.
    pub fn new(source: impl IntoIterator<IntoIter = I>, label: &str, quiet: bool) -> Self {
        Self {
            source: source.into_iter(),
            label: label.to_string(),
            quiet,
            count: 0,
        }
    }
}

impl<'a, I> Iterator for SegmentStream<I>
where
    I: Iterator<Item = &'a Trajectory>,
{
    type Item = Vec<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        let trajectory = self.source.next()?;
        self.count += 1;

        if !self.quiet && self.count % 50 == 0 {
            info!(
                stream = %self.label,
                trajectory = self.count,
                turns = trajectory.turns.len(),
                "converting trajectories"
            );
        } else if self.quiet && self.count % 1000 == 0 {
            info!(stream = %self.label, trajectory = self.count, "converting trajectories");
        }

        Some(
            trajectory
                .turns
                .iter()
                .map(|turn| Segment {
                    text: turn.text.clone(),
                    is_action: turn.is_action,
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::trajectory::Turn;

    fn trajectory(turns: Vec<Turn>) -> Trajectory {
        Trajectory {
            word: "test".into(),
            turns,
        }
    }

    #[test]
    fn yields_one_list_per_trajectory_preserving_order_and_flags() {
        let trajectories = vec![
            trajectory(vec![
                Turn::action("Is it an animal?"),
                Turn::context("No."),
                Turn::action("Is it a vegetable?"),
            ]),
            trajectory(vec![Turn::action("Is it alive?"), Turn::context("Yes.")]),
        ];

        let lists: Vec<Vec<Segment>> =
            SegmentStream::new(trajectories.iter(), "TRAIN", false).collect();

        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0].len(), 3);
        assert_eq!(lists[1].len(), 2);
        assert_eq!(
            lists[0],
            vec![
                Segment {
                    text: "Is it an animal?".into(),
                    is_action: true
                },
                Segment {
                    text: "No.".into(),
                    is_action: false
                },
                Segment {
                    text: "Is it a vegetable?".into(),
                    is_action: true
                },
            ]
        );
    }

    #[test]
    fn quiet_mode_yields_identical_output() {
        let trajectories: Vec<Trajectory> = (0..120)
            .map(|i| {
                trajectory(vec![
                    Turn::action(format!("Question {i}?")),
                    Turn::context("No."),
                ])
            })
            .collect();

        let verbose: Vec<Vec<Segment>> =
            SegmentStream::new(trajectories.iter(), "TRAIN", false).collect();
        let quiet: Vec<Vec<Segment>> =
            SegmentStream::new(trajectories.iter(), "TRAIN", true).collect();

        assert_eq!(verbose, quiet);
    }

    #[test]
    fn empty_source_yields_nothing() {
        let trajectories: Vec<Trajectory> = Vec::new();
        let mut stream = SegmentStream::new(trajectories.iter(), "EVAL", false);
        assert!(stream.next().is_none());
    }

    #[test]
    fn empty_trajectory_yields_empty_list() {
        let trajectories = vec![trajectory(Vec::new())];
        let lists: Vec<Vec<Segment>> =
            SegmentStream::new(trajectories.iter(), "TRAIN", false).collect();
        assert_eq!(lists, vec![Vec::new()]);
    }
}
