pub mod proof_token;
