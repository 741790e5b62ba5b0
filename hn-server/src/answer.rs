//! Generated answers over the top search results.
//!
//! The prompt packs the top result titles and as many comments from the
//! best story as fit under the token budget; the last comment is cut to
//! whatever budget remains. Answers are cached by normalized query.
use hn_embed::{
    document::{token_len, truncate_tokens},
    normalize, OpenAiModel,
};
use hn_store::ItemStore;
use log::error;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Total token budget for one answer exchange.
const ANSWER_BUDGET: usize = 3_840;
/// Portion reserved for the generated answer itself.
const ANSWER_RESERVE: usize = 256;
/// Comments pulled from the best story.
const TOP_COMMENTS: usize = 5;

pub struct AnswerService {
    model: Arc<OpenAiModel>,
    items: Arc<ItemStore>,
    cache: Mutex<HashMap<String, String>>,
}

impl AnswerService {
    pub fn new(model: Arc<OpenAiModel>, items: Arc<ItemStore>) -> Self {
        Self {
            model,
            items,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Answer the query from the given result stories. Failures degrade to
    /// no answer rather than failing the search.
    pub async fn answer(&self, query: &str, story_ids: &[u64]) -> Option<String> {
        let key = normalize(query);
        if let Some(answer) = self.cache.lock().unwrap().get(&key) {
            return Some(answer.clone());
        }

        let prompt = match self.gather_prompt(query, story_ids) {
            Ok(Some(prompt)) => prompt,
            Ok(None) => return None,
            Err(err) => {
                error!("Failed to build answer prompt: {err}");
                return None;
            }
        };

        match self.model.complete(&prompt, ANSWER_RESERVE as u32).await {
            Ok(answer) => {
                self.cache.lock().unwrap().insert(key, answer.clone());
                Some(answer)
            }
            Err(err) => {
                error!("Answer generation failed: {err}");
                None
            }
        }
    }

    fn gather_prompt(
        &self,
        query: &str,
        story_ids: &[u64],
    ) -> Result<Option<String>, hn_store::StoreError> {
        if story_ids.is_empty() {
            return Ok(None);
        }

        let titles: Vec<String> = self
            .items
            .item_rows(story_ids)?
            .into_iter()
            .filter_map(|row| row.title)
            .collect();
        let comments: Vec<String> = self
            .items
            .top_comment_texts(story_ids[0], TOP_COMMENTS)?
            .iter()
            .map(|text| html_clean(text))
            .collect();

        Ok(Some(build_prompt(query, &titles, &comments)))
    }
}

fn html_clean(text: &str) -> String {
    html_text::plain_text(text)
}

/// Assemble the prompt under `ANSWER_BUDGET - ANSWER_RESERVE` tokens. The
/// last comment that does not fit whole is truncated to the remainder.
fn build_prompt(query: &str, titles: &[String], comments: &[String]) -> String {
    let budget = ANSWER_BUDGET - ANSWER_RESERVE;

    let mut prompt = format!(
        "Answer the question using these forum discussions.\n\nQuestion: {query}\n\nStories:\n"
    );
    for title in titles {
        prompt.push_str("- ");
        prompt.push_str(title);
        prompt.push('\n');
    }
    prompt.push_str("\nComments on the first story:\n");

    for comment in comments {
        let used = token_len(&prompt);
        if used >= budget {
            break;
        }
        let entry = format!("- {comment}\n");
        if used + token_len(&entry) <= budget {
            prompt.push_str(&entry);
        } else {
            let remaining = budget - used;
            prompt.push_str(&truncate_tokens(&entry, remaining));
            prompt.push('\n');
            break;
        }
    }
    prompt
}
