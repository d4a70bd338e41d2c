use thiserror::Error;

/// Marks a delivery failure as transient. The dispatcher leaves the message on
/// the queue so it is redelivered once its visibility timeout lapses. Every
/// error not carrying this marker is treated as permanent.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct RetriableError(#[from] anyhow::Error);

pub fn retriable(err: impl Into<anyhow::Error>) -> anyhow::Error {
    RetriableError(err.into()).into()
}

pub fn is_retriable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<RetriableError>().is_some()
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn test_marker_survives_context() {
        let err = retriable(anyhow!("503 from upstream"));
        assert!(is_retriable(&err));
        assert_eq!(err.to_string(), "503 from upstream");

        let wrapped = err.context("cannot send slack notification");
        assert!(is_retriable(&wrapped));
    }

    #[test]
    fn test_plain_errors_are_permanent() {
        assert!(!is_retriable(&anyhow!("bad address")));
    }
}
