mod chunker;
mod crypto;
