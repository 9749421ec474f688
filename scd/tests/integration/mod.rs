mod batch_test;
mod history_test;
mod retries_test;
