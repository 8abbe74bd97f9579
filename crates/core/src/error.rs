use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid period '{0}': expected <FullMonthName>-<YYYY>, e.g. November-2025")]
    InvalidPeriod(String),

    #[error("month out of range: {0}")]
    MonthOutOfRange(u32),

    #[error("year out of range: {0}")]
    YearOutOfRange(i32),
}
