mod mock_feed;
mod simulation;
