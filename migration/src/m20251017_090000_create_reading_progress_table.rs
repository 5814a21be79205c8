use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ReadingProgress::Table)
                    .if_not_exists()
                    .col(string(ReadingProgress::BookId).primary_key())
                    .col(string(ReadingProgress::ChapterId))
                    .col(integer(ReadingProgress::PageIndex))
                    .col(big_integer(ReadingProgress::GlobalPageIndex))
                    .col(double(ReadingProgress::ChapterProgress))
                    .col(double(ReadingProgress::GlobalProgress))
                    .col(timestamp_with_time_zone(ReadingProgress::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ReadingProgress::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum ReadingProgress {
    Table,
    BookId,
    ChapterId,
    PageIndex,
    GlobalPageIndex,
    ChapterProgress,
    GlobalProgress,
    UpdatedAt,
}
