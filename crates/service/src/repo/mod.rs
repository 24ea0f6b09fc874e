pub mod seaorm;

pub use seaorm::SeaOrmServiceRepository;
