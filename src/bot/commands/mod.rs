pub mod booking;
pub mod checking;
pub mod start;

use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Команды бота записи доноров:")]
pub enum Command {
    #[command(description = "регистрация или список доступных дат")]
    Start,
    #[command(description = "включить фоновую проверку дат")]
    StartCheck,
    #[command(description = "остановить фоновую проверку дат")]
    StopCheck,
    #[command(description = "состояние проверки и записи")]
    Status,
    #[command(description = "проверить ввод капчи")]
    TestCaptcha,
    #[command(description = "отменить текущую запись")]
    Cancel,
    #[command(description = "показать это сообщение")]
    Help,
}
