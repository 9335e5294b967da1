#![forbid(unsafe_code)]

pub mod analysis;
pub mod cli;
pub mod cost;
pub mod formats;
pub mod generate;
pub mod keywords;
pub mod llm;
pub mod logging;
pub mod openai;
pub mod output;
pub mod pipeline;
pub mod plan;
pub mod rag;
pub mod scrape;
pub mod session;
pub mod writer;

#[cfg(test)]
mod testing;
