//! HTTP surface of the survey submission service.

pub mod survey_logic;
