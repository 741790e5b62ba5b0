//! Blends vector distance with story score, recency and title topicality
//! into the final result ordering.

const W_SCORE: f64 = 0.25;
const W_DISTANCE: f64 = 0.25;
const W_RECENCY: f64 = 0.4;
const W_TOPICALITY: f64 = 0.15;

/// A search hit joined with the catalog attributes used to rank it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub story_id: u64,
    pub distance: f32,
    pub title: String,
    pub score: i64,
    pub time: i64,
}

/// Min-max normalize into [0, 1]. A degenerate set (min == max) maps to the
/// neutral value: 1, or 0 when reversed. `reverse` flips the scale so that
/// smaller inputs score higher.
pub fn normalize(values: &[f64], reverse: bool) -> Vec<f64> {
    let Some(min) = values.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let max = values.iter().copied().reduce(f64::max).unwrap_or(min);

    if max == min {
        return vec![if reverse { 0.0 } else { 1.0 }; values.len()];
    }
    values
        .iter()
        .map(|value| {
            let normalized = (value - min) / (max - min);
            if reverse {
                1.0 - normalized
            } else {
                normalized
            }
        })
        .collect()
}

/// Position-weighted overlap between the query words and the title words:
/// a title word that appears in the query contributes `1 / (position + 1)`.
pub fn topicality(query: &str, title: &str) -> f64 {
    let query_words: std::collections::HashSet<String> =
        query.split_whitespace().map(str::to_lowercase).collect();

    title
        .split_whitespace()
        .map(str::to_lowercase)
        .enumerate()
        .filter(|(_, word)| query_words.contains(word))
        .map(|(i, _)| 1.0 / (i + 1) as f64)
        .sum()
}

/// Order candidates by the blended rank, best first. Ties break on
/// ascending story id; the output is a permutation of the input ids.
pub fn rank(query: &str, candidates: &[Candidate], now: i64) -> Vec<u64> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let scores: Vec<f64> = candidates.iter().map(|c| c.score as f64).collect();
    let distances: Vec<f64> = candidates.iter().map(|c| c.distance as f64).collect();
    let ages: Vec<f64> = candidates.iter().map(|c| (now - c.time) as f64).collect();

    let norm_scores = normalize(&scores, false);
    let norm_distances = normalize(&distances, true);
    let norm_recencies = normalize(&ages, true);

    let mut ranked: Vec<(f64, u64)> = candidates
        .iter()
        .enumerate()
        .map(|(i, candidate)| {
            let blended = W_SCORE * norm_scores[i]
                + W_DISTANCE * norm_distances[i]
                + W_RECENCY * norm_recencies[i]
                + W_TOPICALITY * topicality(query, &candidate.title);
            (blended, candidate.story_id)
        })
        .collect();

    ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    ranked.into_iter().map(|(_, id)| id).collect()
}

#[cfg(test)]
mod tests {
    use super::{normalize, rank, topicality, Candidate};

    fn candidate(story_id: u64, distance: f32, title: &str, score: i64, time: i64) -> Candidate {
        Candidate {
            story_id,
            distance,
            title: title.into(),
            score,
            time,
        }
    }

    #[test]
    fn normalize_degenerate_sets() {
        assert_eq!(normalize(&[3.0, 3.0, 3.0], false), vec![1.0, 1.0, 1.0]);
        assert_eq!(normalize(&[3.0, 3.0], true), vec![0.0, 0.0]);
        assert!(normalize(&[], false).is_empty());
    }

    #[test]
    fn normalize_reversed_flips_scale() {
        assert_eq!(normalize(&[0.0, 5.0, 10.0], true), vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn topicality_weighs_title_position() {
        assert_eq!(topicality("foo bar", "foo something"), 1.0);
        assert_eq!(topicality("foo bar", "something foo"), 0.5);
        assert!(topicality("foo", "unrelated title") == 0.0);
        // Case-insensitive on both sides.
        assert_eq!(topicality("Foo", "FOO bar"), 1.0);
    }

    #[test]
    fn fresh_topical_story_outranks_popular_stale_one() {
        let now = 1_700_000_000;
        let candidates = vec![
            // A: close, modest score, an hour old, topical title.
            candidate(10, 0.1, "foo bar", 50, now - 3_600),
            // B: further, huge score, a month old, unrelated title.
            candidate(20, 0.2, "unrelated title", 500, now - 30 * 24 * 3_600),
        ];

        let ranked = rank("foo", &candidates, now);
        assert_eq!(ranked, vec![10, 20]);
    }

    #[test]
    fn output_is_a_permutation_of_input() {
        let now = 1_700_000_000;
        let candidates: Vec<Candidate> = (1..=8)
            .map(|i| candidate(i, i as f32 * 0.1, "title", i as i64 * 10, now - i as i64))
            .collect();

        let mut ranked = rank("query", &candidates, now);
        ranked.sort_unstable();

        assert_eq!(ranked, (1..=8).collect::<Vec<u64>>());
    }

    #[test]
    fn ties_break_on_ascending_story_id() {
        let now = 1_700_000_000;
        let candidates = vec![
            candidate(7, 0.1, "same", 10, now),
            candidate(3, 0.1, "same", 10, now),
        ];

        assert_eq!(rank("nothing", &candidates, now), vec![3, 7]);
    }

    #[test]
    fn empty_input_ranks_to_nothing() {
        assert!(rank("query", &[], 0).is_empty());
    }
}
