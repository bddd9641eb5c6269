//! Database seeder for Donora development and testing.
//!
//! Seeds one user with a chat message, a post and a comment on it, so every
//! attachment owner kind has a row to attach files to.
//!
//! Usage: cargo run --bin seeder

use chrono::Utc;
use donora_db::entities::{chat_messages, chats, post_comments, posts, users};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use uuid::Uuid;

/// Test user ID (consistent for all seeds)
const TEST_USER_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0001);
/// Test chat ID
const TEST_CHAT_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0002);
/// Test chat message ID
const TEST_CHAT_MESSAGE_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0003);
/// Test post ID
const TEST_POST_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0004);
/// Test post comment ID
const TEST_POST_COMMENT_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0005);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set in environment");

    println!("Connecting to database...");
    let db = donora_db::connect(&database_url)
        .await
        .expect("Failed to connect to database");

    println!("Seeding test user...");
    seed_test_user(&db).await;

    println!("Seeding test chat message...");
    seed_chat_message(&db).await;

    println!("Seeding test post and comment...");
    seed_post(&db).await;

    println!("Seeding complete!");
    println!("  chat message: {TEST_CHAT_MESSAGE_ID}");
    println!("  post:         {TEST_POST_ID}");
    println!("  post comment: {TEST_POST_COMMENT_ID}");
}

/// Seeds a test user for development.
async fn seed_test_user(db: &DatabaseConnection) {
    if users::Entity::find_by_id(TEST_USER_ID)
        .one(db)
        .await
        .ok()
        .flatten()
        .is_some()
    {
        println!("  Test user already exists, skipping...");
        return;
    }

    users::ActiveModel {
        id: Set(TEST_USER_ID),
        email: Set("test@donora.dev".to_string()),
        display_name: Set("Test User".to_string()),
        created_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await
    .expect("Failed to create test user");

    println!("  Created test user: test@donora.dev");
}

/// Seeds a chat with one message.
async fn seed_chat_message(db: &DatabaseConnection) {
    if chat_messages::Entity::find_by_id(TEST_CHAT_MESSAGE_ID)
        .one(db)
        .await
        .ok()
        .flatten()
        .is_some()
    {
        println!("  Test chat message already exists, skipping...");
        return;
    }

    chats::ActiveModel {
        id: Set(TEST_CHAT_ID),
        created_by: Set(TEST_USER_ID),
        title: Set(Some("Campaign team".to_string())),
        created_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await
    .expect("Failed to create test chat");

    chat_messages::ActiveModel {
        id: Set(TEST_CHAT_MESSAGE_ID),
        chat_id: Set(TEST_CHAT_ID),
        author_id: Set(TEST_USER_ID),
        body: Set("Here are the receipts from the venue.".to_string()),
        created_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await
    .expect("Failed to create test chat message");

    println!("  Created chat message");
}

/// Seeds a fundraising post with one comment.
async fn seed_post(db: &DatabaseConnection) {
    if posts::Entity::find_by_id(TEST_POST_ID)
        .one(db)
        .await
        .ok()
        .flatten()
        .is_some()
    {
        println!("  Test post already exists, skipping...");
        return;
    }

    let now = Utc::now();
    posts::ActiveModel {
        id: Set(TEST_POST_ID),
        author_id: Set(TEST_USER_ID),
        title: Set("New roof for the community library".to_string()),
        body: Set("We are raising funds to replace the library roof before winter.".to_string()),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(db)
    .await
    .expect("Failed to create test post");

    post_comments::ActiveModel {
        id: Set(TEST_POST_COMMENT_ID),
        post_id: Set(TEST_POST_ID),
        author_id: Set(TEST_USER_ID),
        body: Set("Pledged! Photos of the current damage attached.".to_string()),
        created_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await
    .expect("Failed to create test comment");

    println!("  Created post and comment");
}
