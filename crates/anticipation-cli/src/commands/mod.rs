pub mod anticipation;
