pub(crate) const NOT_RUNNING: &str = "В вашем чате не запущена викторина.";
pub(crate) const STOPPED_AFTER_ANSWER: &str = "Викторина остановлена.";
pub(crate) const STOPPED_WITHOUT_ANSWER: &str = "Викторина остановлена. Ответа не будет.";
pub(crate) const CORRECT_ANSWER: &str = "Поздравляю! Вы правы!";
const ALREADY_RUNNING: &str = "В этом чате уже запущена викторина.";

pub(crate) fn already_running_active(question: &str, hint: &str) -> String {
    format!("{ALREADY_RUNNING}\nТекущий вопрос: {question}\nТекущая подсказка: {hint}")
}

pub(crate) fn already_running_paused() -> String {
    format!("{ALREADY_RUNNING}\nПодождите, скоро будет новый вопрос.")
}

pub(crate) fn hint(hint: &str) -> String {
    format!("Подсказка: {hint}")
}

pub(crate) fn nobody_answered(answer: &str) -> String {
    format!("Никто не дал правильного ответа.\nПравильный ответ: {answer}")
}
