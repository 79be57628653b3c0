//! Instruction text for each generation role.

use chrono::{Local, NaiveDate};

/// Today's date as shown to the model, e.g. "October 14, 2026".
pub fn current_date() -> String {
    format_date(Local::now().date_naive())
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%B %d, %Y").to_string()
}

pub fn query_writer(query_count: usize, date: &str) -> String {
    format!(
        "You write web search queries for an automated research tool.\n\
         \n\
         Rules:\n\
         - Prefer a single query. Add another only when the topic asks about several \
           independent aspects that one query cannot cover.\n\
         - Each query targets one specific aspect of the topic.\n\
         - Never produce more than {query_count} queries.\n\
         - Queries must not repeat each other in different words.\n\
         - Aim for current information. Today is {date}.\n\
         \n\
         Use the key \"rationale\" for a short explanation and \"query\" for the list of queries."
    )
}

pub fn summarizer(topic: &str, date: &str) -> String {
    format!(
        "You condense web search results gathered for the research topic \"{topic}\".\n\
         \n\
         Rules:\n\
         - Today is {date}; prefer the most recent facts.\n\
         - Use only information present in the numbered results. Invent nothing.\n\
         - Cite every claim with the number of the result it came from, written as [n].\n\
         - Cite several results as [1][2], one number per bracket.\n\
         - Only cite numbers that appear in the result list.\n\
         - Write well organised prose under the key \"summary\"."
    )
}

pub fn reflection(topic: &str) -> String {
    format!(
        "You review research summaries about \"{topic}\" and decide whether they answer it.\n\
         \n\
         Rules:\n\
         - If the summaries answer the topic, set \"is_sufficient\" to true, leave \
           \"knowledge_gap\" empty and return no follow-up queries.\n\
         - Otherwise describe the missing information in \"knowledge_gap\" and return one \
           or more self-contained web search queries in \"follow_up_queries\" that would fill it.\n\
         - Focus on technical detail, concrete figures and recent developments the summaries miss."
    )
}

pub fn answer(topic: &str, date: &str) -> String {
    format!(
        "Write a detailed, well structured research report on \"{topic}\" from the summaries \
         you are given. Today is {date}.\n\
         \n\
         Rules:\n\
         - Open with an executive summary that answers the topic directly.\n\
         - Organise the findings under clear markdown section headers (##). Cover background, \
           detailed findings, points where sources agree or disagree, open questions, and a conclusion.\n\
         - Support claims with specifics from the summaries and cite them with the source \
           numbers [n] exactly as they appear in the summaries.\n\
         - Write each citation as its own [n]; cite several sources as [1][3], never as \
           [1, 3] or [1-3].\n\
         - Do not add a title or a sources list; both are added afterwards.\n\
         - Put the whole report in markdown under the key \"report\"."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_date() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(format_date(date), "March 07, 2025");
    }

    #[test]
    fn test_query_writer_mentions_cap() {
        let text = query_writer(3, "June 01, 2025");
        assert!(text.contains("more than 3 queries"));
        assert!(text.contains("June 01, 2025"));
    }

    #[test]
    fn test_topic_is_embedded() {
        assert!(summarizer("fusion power", "d").contains("\"fusion power\""));
        assert!(reflection("fusion power").contains("\"fusion power\""));
        assert!(answer("fusion power", "d").contains("\"fusion power\""));
    }
}
