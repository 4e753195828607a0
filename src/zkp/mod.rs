pub mod proof_gate;
